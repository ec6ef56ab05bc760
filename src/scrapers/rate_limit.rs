//! Request pacing for the remote API.
//!
//! The API enforces a fixed per-key request rate, so every outbound call goes
//! through one shared [`RateLimiter`]. Admissions are spaced one interval
//! apart (no burst window): callers suspend cooperatively on the internal
//! mutex queue and are admitted in order — never dropped, never reordered.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

#[derive(Debug)]
struct PacerState {
    next_slot: Option<Instant>,
}

/// Token pacer admitting at most `requests_per_sec` calls per second.
#[derive(Clone)]
pub struct RateLimiter {
    interval: Duration,
    state: Arc<Mutex<PacerState>>,
}

impl RateLimiter {
    pub fn new(requests_per_sec: u32) -> Self {
        let requests_per_sec = requests_per_sec.max(1);
        Self {
            interval: Duration::from_secs(1) / requests_per_sec,
            state: Arc::new(Mutex::new(PacerState { next_slot: None })),
        }
    }

    /// Wait for the next admission slot. Returns once the caller may issue
    /// its request. tokio's mutex queue is FIFO, so waiters are admitted in
    /// arrival order.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let slot = match state.next_slot {
            Some(next) if next > now => next,
            _ => now,
        };
        state.next_slot = Some(slot + self.interval);
        drop(state);

        sleep_until(slot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_hundred_calls_at_twenty_per_sec() {
        let limiter = RateLimiter::new(20);
        let start = Instant::now();
        let mut admitted = 0u32;
        for _ in 0..100 {
            limiter.acquire().await;
            admitted += 1;
        }
        assert_eq!(admitted, 100);
        // 99 gaps of 50ms after the immediate first admission
        assert!(start.elapsed() >= Duration::from_millis(4950));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_the_budget() {
        let limiter = RateLimiter::new(10);
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..4 {
            let l = limiter.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..5 {
                    l.acquire().await;
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        // 20 admissions at 10/s: 19 gaps of 100ms
        assert!(start.elapsed() >= Duration::from_millis(1900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_limiter_admits_immediately() {
        let limiter = RateLimiter::new(20);
        limiter.acquire().await;
        tokio::time::advance(Duration::from_secs(5)).await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
