//! Job scheduling and process wiring for the market data pipeline.
//!
//! [`scheduler::Scheduler`] owns recurring [`trigger::Trigger`]s, dispatches
//! due jobs into a bounded worker pool, keeps the latest [`registry::JobRun`]
//! per job id and restarts its own timer loop when it dies. [`jobs`] holds
//! the concrete jobs over [`asset_sync::SyncOrchestrator`]; [`app`] builds
//! everything from an [`config::AppConfig`].

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod job;
pub mod jobs;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod signals;
pub mod trigger;

pub use error::SchedulerError;
pub use scheduler::{Scheduler, SchedulerOptions, SchedulerState, SchedulerStatus};
