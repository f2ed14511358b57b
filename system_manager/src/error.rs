//! Scheduler error taxonomy.

use shared_utils::config::ConfigError;
use thiserror::Error;

/// Errors raised by the scheduler and its configuration.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Storage never became reachable within the retry budget.
    #[error("storage unreachable after {attempts} attempts: {last_error}")]
    ConnectRetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last_error: String,
    },

    /// No job registered under the id.
    #[error("unknown job `{0}`")]
    UnknownJob(String),

    /// The job already has a run in flight.
    #[error("job `{0}` is already running")]
    AlreadyRunning(String),

    /// A job body failed.
    #[error("job `{id}` failed: {message}")]
    JobExecution {
        /// Job id.
        id: String,
        /// Rendered error or panic payload.
        message: String,
    },

    /// A trigger expression could not be parsed.
    #[error("invalid trigger field `{expr}`: {reason}")]
    InvalidTrigger {
        /// Offending expression.
        expr: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Background tasks could not be spawned.
    #[error("no async runtime available: {0}")]
    Runtime(String),

    /// Invalid configuration value.
    #[error(transparent)]
    Config(#[from] ConfigError),
}
