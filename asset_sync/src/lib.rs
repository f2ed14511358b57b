//! Incremental market-data synchronization.
//!
//! The pipeline reads what is already stored, fetches only the missing
//! delta from the external sources, derives indicators and upserts the
//! result:
//!
//! - [`store`]: query-builder capability (`Query`, `TableStore`) with SQLite
//!   and in-memory implementations
//! - [`fetcher`]: delta window and row validation
//! - [`indicators`]: per-point rolling statistics and window aggregates
//! - [`writer`]: batched idempotent upserts
//! - [`orchestrator`]: per-symbol coordination and the live-quote path
//! - [`index_series`]: continuity-chained index built from daily rates
//! - [`health`] and [`summary`]: read-side checks and reports

#![deny(missing_docs)]

pub mod api;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod health;
pub mod index_series;
pub mod indicators;
pub mod models;
pub mod orchestrator;
pub mod store;
pub mod summary;
pub mod tickers;
pub mod tz;
pub mod writer;

pub use error::SyncError;
pub use orchestrator::{Sources, SyncOrchestrator, SyncReport};
