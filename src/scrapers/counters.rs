//! Cross-process request counters.
//!
//! Worker processes sharing one API key also share two observational
//! counters: requests actually issued to the network, and fetch calls
//! attempted (cache hits included). They live in a small memory-mapped file
//! of atomics so separate OS processes see one view. Purely observational —
//! never consulted for correctness. If the map cannot be created we fall back
//! to process-local atomics and keep going.

use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

const SLOT_REQUESTS: usize = 0;
const SLOT_CALLS: usize = 1;
const SLOTS: usize = 2;
const MAP_LEN: u64 = (SLOTS * std::mem::size_of::<u64>()) as u64;

enum Backing {
    Shared(MmapMut),
    Local([AtomicU64; SLOTS]),
}

pub struct ReqCounters {
    backing: Backing,
}

impl ReqCounters {
    /// Open (or create) the shared counter file under `dir`.
    pub fn open(dir: &Path) -> Self {
        match Self::try_open(dir) {
            Ok(map) => Self {
                backing: Backing::Shared(map),
            },
            Err(e) => {
                warn!(error = %e, "shared counters unavailable, using process-local");
                Self::local()
            }
        }
    }

    /// Process-local counters (tests, or when the map cannot be created).
    pub fn local() -> Self {
        Self {
            backing: Backing::Local([AtomicU64::new(0), AtomicU64::new(0)]),
        }
    }

    fn try_open(dir: &Path) -> std::io::Result<MmapMut> {
        std::fs::create_dir_all(dir)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir.join("req_counters"))?;
        file.set_len(MAP_LEN)?;
        unsafe { MmapMut::map_mut(&file) }
    }

    fn slot(&self, idx: usize) -> &AtomicU64 {
        match &self.backing {
            // the file is zero-initialized and u64-aligned by mmap
            Backing::Shared(map) => unsafe {
                &*(map.as_ptr().cast::<AtomicU64>().add(idx))
            },
            Backing::Local(slots) => &slots[idx],
        }
    }

    pub fn record_call(&self) -> u64 {
        self.slot(SLOT_CALLS).fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn record_request(&self) -> u64 {
        self.slot(SLOT_REQUESTS).fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn calls(&self) -> u64 {
        self.slot(SLOT_CALLS).load(Ordering::Relaxed)
    }

    pub fn requests(&self) -> u64 {
        self.slot(SLOT_REQUESTS).load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_counters_increment() {
        let counters = ReqCounters::local();
        assert_eq!(counters.record_call(), 1);
        assert_eq!(counters.record_call(), 2);
        assert_eq!(counters.record_request(), 1);
        assert_eq!(counters.calls(), 2);
        assert_eq!(counters.requests(), 1);
    }

    #[test]
    fn test_shared_counters_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let counters = ReqCounters::open(dir.path());
            counters.record_request();
            counters.record_request();
            counters.record_call();
        }
        // a second "process" opening the same file sees the totals
        let counters = ReqCounters::open(dir.path());
        assert_eq!(counters.requests(), 2);
        assert_eq!(counters.calls(), 1);
    }

    #[test]
    fn test_shared_counters_concurrent_increment() {
        let dir = tempfile::tempdir().unwrap();
        let counters = std::sync::Arc::new(ReqCounters::open(dir.path()));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let c = counters.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    c.record_call();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counters.calls(), 8000);
    }
}
