//! The service's recurring jobs.

use std::sync::Arc;

use anyhow::bail;
use asset_sync::SyncOrchestrator;
use async_trait::async_trait;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::warn;

use crate::{
    config::{DAILY_SYNC, HEALTH_CHECK, QUOTES_BUSINESS_HOURS, QUOTES_OFF_HOURS, SchedulerConfig},
    error::SchedulerError,
    job::{Job, JobDescriptor},
};

/// Runs `work` on the blocking pool. The store is synchronous, so a long
/// upsert must not hold an async worker thread.
async fn off_runtime<T, F>(orchestrator: &Arc<SyncOrchestrator>, work: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&SyncOrchestrator, &Handle) -> T + Send + 'static,
{
    let orchestrator = Arc::clone(orchestrator);
    let handle = Handle::try_current()?;
    Ok(tokio::task::spawn_blocking(move || work(&orchestrator, &handle)).await?)
}

/// Historical bars for every symbol plus the index series.
pub struct DailySyncJob {
    orchestrator: Arc<SyncOrchestrator>,
}

impl DailySyncJob {
    /// Job over `orchestrator`.
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Job for DailySyncJob {
    async fn run(&self) -> anyhow::Result<Value> {
        let report = off_runtime(&self.orchestrator, |o, rt| rt.block_on(o.sync_all())).await?;
        if report.all_failed() {
            bail!("all {} symbols failed", report.attempted);
        }
        Ok(serde_json::to_value(report)?)
    }
}

/// Live quote refresh of every stored symbol.
pub struct QuoteRefreshJob {
    orchestrator: Arc<SyncOrchestrator>,
}

impl QuoteRefreshJob {
    /// Job over `orchestrator`.
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Job for QuoteRefreshJob {
    async fn run(&self) -> anyhow::Result<Value> {
        let report =
            off_runtime(&self.orchestrator, |o, rt| rt.block_on(o.refresh_quotes())).await?;
        if report.all_failed() {
            bail!("all {} quotes failed", report.attempted);
        }
        Ok(serde_json::to_value(report)?)
    }
}

/// Staleness check. Stale data is a warning in the output, not a failure.
pub struct HealthCheckJob {
    orchestrator: Arc<SyncOrchestrator>,
}

impl HealthCheckJob {
    /// Job over `orchestrator`.
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl Job for HealthCheckJob {
    async fn run(&self) -> anyhow::Result<Value> {
        let report = off_runtime(&self.orchestrator, |o, _| o.health_check()).await?;
        if !report.is_ok() {
            let tickers: Vec<&str> = report.issues.iter().map(|i| i.ticker.as_str()).collect();
            warn!(?tickers, "historical data needs attention");
        }
        Ok(serde_json::to_value(report)?)
    }
}

/// Descriptors from `cfg` paired with their job bodies.
pub fn build_jobs(
    cfg: &SchedulerConfig,
    orchestrator: &Arc<SyncOrchestrator>,
) -> Result<Vec<(JobDescriptor, Arc<dyn Job>)>, SchedulerError> {
    cfg.job_descriptors()?
        .into_iter()
        .map(|d| {
            let orchestrator = Arc::clone(orchestrator);
            let job: Arc<dyn Job> = match d.id.as_str() {
                DAILY_SYNC => Arc::new(DailySyncJob::new(orchestrator)),
                QUOTES_BUSINESS_HOURS | QUOTES_OFF_HOURS => {
                    Arc::new(QuoteRefreshJob::new(orchestrator))
                }
                HEALTH_CHECK => Arc::new(HealthCheckJob::new(orchestrator)),
                other => return Err(SchedulerError::UnknownJob(other.to_string())),
            };
            Ok((d, job))
        })
        .collect()
}
