//! Clash of Clans API client.
//!
//! One method per remote path, all funneled through [`CocApiClient::get_raw`]:
//! counter bump, replay-cache lookup, rate-limit wait, network fetch,
//! failure classification, cache write-back. The client is cheap to clone and
//! is shared across concurrent workers; only the rate limiter suspends.

use serde_json::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::models::Config;
use crate::scrapers::counters::ReqCounters;
use crate::scrapers::rate_limit::RateLimiter;
use crate::scrapers::req_cache::RequestCache;
use crate::scrapers::wire::{
    RawApiError, RawClan, RawLeagueGroup, RawMemberList, RawWar, RawWarLog,
};

/// Fetch failures, classified.
#[derive(Debug, Clone)]
pub enum FetchError {
    /// 4xx with reason `notFound`: the tag does not currently resolve.
    /// For league-group fetches this means "not in a league right now".
    NotFound,
    /// 4xx with reason `accessDenied`: the clan's war log is private.
    LogPrivate,
    /// Offline mode and no captured document for the path.
    CacheMiss(PathBuf),
    /// Network/transport failure unrelated to domain semantics.
    Transport(String),
    /// The response body did not match the expected document shape.
    Decode(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::NotFound => write!(f, "tag not found"),
            FetchError::LogPrivate => write!(f, "war log is private"),
            FetchError::CacheMiss(p) => write!(f, "no cached document at {}", p.display()),
            FetchError::Transport(e) => write!(f, "transport error: {}", e),
            FetchError::Decode(e) => write!(f, "decode error: {}", e),
        }
    }
}

impl std::error::Error for FetchError {}

#[derive(Clone)]
pub struct CocApiClient {
    http: Option<reqwest::Client>,
    api_base: String,
    limiter: RateLimiter,
    cache: Arc<RequestCache>,
    counters: Arc<ReqCounters>,
    offline: bool,
    use_cache: bool,
    save_responses: bool,
}

impl CocApiClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = if config.offline {
            None
        } else {
            let mut headers = reqwest::header::HeaderMap::new();
            headers.insert(reqwest::header::ACCEPT, "application/json".parse()?);
            if let Some(token) = &config.api_token {
                headers.insert(
                    reqwest::header::AUTHORIZATION,
                    format!("Bearer {}", token).parse()?,
                );
            }
            Some(
                reqwest::Client::builder()
                    .timeout(Duration::from_secs(config.request_timeout_secs))
                    .default_headers(headers)
                    .build()?,
            )
        };

        Ok(Self {
            http,
            api_base: config.api_base.clone(),
            limiter: RateLimiter::new(config.rate_limit),
            cache: Arc::new(RequestCache::new(&config.cache_dir)),
            counters: Arc::new(ReqCounters::open(std::path::Path::new(&config.cache_dir))),
            offline: config.offline,
            use_cache: config.use_cache,
            save_responses: config.save_responses,
        })
    }

    pub fn counters(&self) -> &ReqCounters {
        &self.counters
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    fn encode_tag(tag: &str) -> String {
        tag.replace('#', "%23")
    }

    /// One logical fetch: replay cache first, then the network.
    async fn get_raw(&self, url: String) -> Result<Value, FetchError> {
        self.counters.record_call();

        if self.use_cache || self.offline {
            match self.cache.load(&self.api_base, &url) {
                Ok(Some(doc)) => return Ok(doc),
                Ok(None) => {}
                Err(e) => warn!(url = %url, error = %e, "cache read failed, falling through"),
            }
        }
        if self.offline {
            return Err(FetchError::CacheMiss(
                self.cache.path_for(&self.api_base, &url),
            ));
        }

        self.limiter.acquire().await;

        let http = self
            .http
            .as_ref()
            .expect("live client present when not offline");
        let resp = http
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        self.counters.record_request();

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::classify_failure(status, &body));
        }

        let doc: Value = resp
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;

        if self.save_responses {
            if let Err(e) = self.cache.store(&self.api_base, &url, &doc) {
                warn!(url = %url, error = %e, "failed to persist response");
            }
        }
        debug!(url = %url, requests = self.counters.requests(), "fetched");
        Ok(doc)
    }

    /// Map a non-2xx response to a domain-level outcome.
    fn classify_failure(status: reqwest::StatusCode, body: &str) -> FetchError {
        if status.is_client_error() {
            let reason = serde_json::from_str::<RawApiError>(body)
                .ok()
                .and_then(|e| e.reason);
            match reason.as_deref() {
                Some("notFound") => return FetchError::NotFound,
                Some("accessDenied") => return FetchError::LogPrivate,
                _ => {}
            }
        }
        FetchError::Transport(format!("{}: {}", status, body))
    }

    fn decode<T: serde::de::DeserializeOwned>(doc: Value) -> Result<T, FetchError> {
        serde_json::from_value(doc).map_err(|e| FetchError::Decode(e.to_string()))
    }

    /// `/clans/{tag}/currentwar/leaguegroup`
    pub async fn get_league_group(&self, tag: &str) -> Result<RawLeagueGroup, FetchError> {
        let url = self.url(&format!(
            "/clans/{}/currentwar/leaguegroup",
            Self::encode_tag(tag)
        ));
        Self::decode(self.get_raw(url).await?)
    }

    /// `/clanwarleagues/wars/{warTag}`
    pub async fn get_league_war(&self, war_tag: &str) -> Result<RawWar, FetchError> {
        let url = self.url(&format!(
            "/clanwarleagues/wars/{}",
            Self::encode_tag(war_tag)
        ));
        Self::decode(self.get_raw(url).await?)
    }

    /// `/clans/{tag}/currentwar`
    pub async fn get_current_war(&self, tag: &str) -> Result<RawWar, FetchError> {
        let url = self.url(&format!("/clans/{}/currentwar", Self::encode_tag(tag)));
        Self::decode(self.get_raw(url).await?)
    }

    /// `/clans/{tag}`
    pub async fn get_clan(&self, tag: &str) -> Result<RawClan, FetchError> {
        let url = self.url(&format!("/clans/{}", Self::encode_tag(tag)));
        Self::decode(self.get_raw(url).await?)
    }

    /// `/clans/{tag}/members`
    pub async fn get_clan_members(&self, tag: &str) -> Result<RawMemberList, FetchError> {
        let url = self.url(&format!("/clans/{}/members", Self::encode_tag(tag)));
        Self::decode(self.get_raw(url).await?)
    }

    /// `/clans/{tag}/warlog`
    pub async fn get_war_log(&self, tag: &str) -> Result<RawWarLog, FetchError> {
        let url = self.url(&format!("/clans/{}/warlog", Self::encode_tag(tag)));
        Self::decode(self.get_raw(url).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_not_found_reason() {
        let err = CocApiClient::classify_failure(
            reqwest::StatusCode::NOT_FOUND,
            r#"{"reason":"notFound"}"#,
        );
        assert!(matches!(err, FetchError::NotFound));
    }

    #[test]
    fn test_classify_access_denied_reason() {
        let err = CocApiClient::classify_failure(
            reqwest::StatusCode::FORBIDDEN,
            r#"{"reason":"accessDenied","message":"war log is private"}"#,
        );
        assert!(matches!(err, FetchError::LogPrivate));
    }

    #[test]
    fn test_classify_other_failures_as_transport() {
        let err = CocApiClient::classify_failure(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            r#"{"reason":"notFound"}"#,
        );
        assert!(matches!(err, FetchError::Transport(_)));

        let err = CocApiClient::classify_failure(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            "slow down",
        );
        assert!(matches!(err, FetchError::Transport(_)));
    }

    #[tokio::test]
    async fn test_offline_replay_and_cache_miss() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            database_path: ":memory:".into(),
            api_base: "https://api.example.com/v1".into(),
            api_token: None,
            offline: true,
            use_cache: true,
            save_responses: false,
            cache_dir: dir.path().to_str().unwrap().to_string(),
            rate_limit: 20,
            request_timeout_secs: 2,
            rounds_per_group: 7,
            wars_per_round: 4,
        };
        let client = CocApiClient::new(&config).unwrap();

        // no fixture: cache miss, no network attempted
        match client.get_clan("#8ULL0ULU").await {
            Err(FetchError::CacheMiss(_)) => {}
            other => panic!("expected cache miss, got {:?}", other.map(|_| ())),
        }

        // drop a fixture in place and fetch again
        let cache = RequestCache::new(config.cache_dir.as_str());
        cache
            .store(
                &config.api_base,
                "https://api.example.com/v1/clans/%238ULL0ULU",
                &serde_json::json!({"tag": "#8ULL0ULU", "name": "Official"}),
            )
            .unwrap();
        let clan = client.get_clan("#8ULL0ULU").await.unwrap();
        assert_eq!(clan.tag, "#8ULL0ULU");
        assert_eq!(client.counters().calls(), 2);
        assert_eq!(client.counters().requests(), 0);
    }
}
