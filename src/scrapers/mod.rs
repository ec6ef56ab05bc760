pub mod coc_api;
pub mod counters;
pub mod rate_limit;
pub mod req_cache;
pub mod wire;

pub use coc_api::{CocApiClient, FetchError};
pub use rate_limit::RateLimiter;
