//! WarTrack Backend Library
//!
//! Exposes the fetch-and-reconcile core for the binary and the integration
//! tests: API client, domain model, reconciliation engine, storage gateway
//! and the sync pipelines.

pub mod models;
pub mod reconcile;
pub mod scrapers;
pub mod storage;
pub mod sync;
pub mod tags;

pub use models::Config;
pub use sync::{BatchReport, SyncEngine, SyncOutcome};
