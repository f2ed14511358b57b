//! Bounded retries for establishing the storage connection.

use std::{fmt::Display, future::Future, time::Duration};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::SchedulerError;

/// Attempts and spacing of a retried operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Wait between two attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            backoff: Duration::from_secs(5),
        }
    }
}

/// Something that waits.
#[async_trait]
pub trait Sleeper: Send + Sync {
    /// Waits for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Waits on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Calls `connect` until it succeeds or the policy is exhausted.
///
/// `connect` receives the 1-based attempt number. The sleeper is called
/// between attempts only, so `n` attempts sleep `n - 1` times.
pub async fn connect_with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut connect: F,
) -> Result<T, SchedulerError>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match connect(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    info!(attempt, "storage connection established");
                }
                return Ok(value);
            }
            Err(e) => {
                last_error = e.to_string();
                warn!(attempt, attempts, error = %last_error, "storage connection failed");
            }
        }
        if attempt < attempts {
            sleeper.sleep(policy.backoff).await;
        }
    }
    Err(SchedulerError::ConnectRetriesExhausted {
        attempts,
        last_error,
    })
}
