//! Wiring: storage, providers, orchestrator and scheduler from an
//! [`AppConfig`].

use std::sync::Arc;

use anyhow::Context;
use asset_sync::{
    Sources, SyncOrchestrator,
    clock::{Clock, SystemClock},
    config::PipelineConfig,
    store::{StoreError, TableStore, sqlite::SqliteStore},
};
use market_data_ingestor::providers::{
    bcb::BcbProvider,
    rtd::{RtdProvider, RtdSettings},
    yahoo::YahooProvider,
};
use tracing::{debug, info};

use crate::{
    config::AppConfig,
    error::SchedulerError,
    jobs::build_jobs,
    retry::{RetryPolicy, Sleeper, connect_with_retry},
    scheduler::Scheduler,
};

/// Opens the SQLite store and pings it, retrying per `policy`.
pub async fn connect_store(
    database_url: &str,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
) -> Result<Arc<SqliteStore>, SchedulerError> {
    let store = connect_with_retry(policy, sleeper, |attempt| {
        let url = database_url.to_string();
        async move {
            debug!(attempt, %url, "connecting to storage");
            tokio::task::spawn_blocking(move || {
                let store = SqliteStore::open(&url)?;
                store.ping()?;
                Ok::<_, StoreError>(store)
            })
            .await
            .map_err(|e| e.to_string())?
            .map_err(|e| e.to_string())
        }
    })
    .await?;
    info!(database_url, "storage connected");
    Ok(Arc::new(store))
}

/// HTTP providers configured from the pipeline settings.
pub fn build_sources(cfg: &PipelineConfig) -> anyhow::Result<Sources> {
    let timeout = cfg.http_timeout();
    let quotes = RtdProvider::new(RtdSettings {
        base_url: cfg.quotes.base_url.clone(),
        field: cfg.quotes.field.clone(),
        timeout,
        min_interval: std::time::Duration::from_millis(cfg.quotes.min_interval_ms),
    })
    .context("build quote provider")?;
    Ok(Sources {
        bars: Arc::new(YahooProvider::new(timeout).context("build bar provider")?),
        quotes: Arc::new(quotes),
        rates: Arc::new(BcbProvider::new(timeout).context("build rate provider")?),
    })
}

/// Orchestrator over `store` with the production providers.
pub fn build_orchestrator(
    cfg: &AppConfig,
    store: Arc<dyn TableStore>,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<Arc<SyncOrchestrator>> {
    let sources = build_sources(&cfg.pipeline)?;
    let orchestrator = SyncOrchestrator::new(store, sources, clock, cfg.pipeline.clone())?;
    Ok(Arc::new(orchestrator))
}

/// Scheduler with every configured job registered, not started.
pub fn build_scheduler(
    cfg: &AppConfig,
    orchestrator: &Arc<SyncOrchestrator>,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<Scheduler> {
    let scheduler = Scheduler::new(cfg.scheduler.options()?, clock);
    for (descriptor, job) in build_jobs(&cfg.scheduler, orchestrator)? {
        scheduler.register(descriptor, job);
    }
    Ok(scheduler)
}

/// Connected store, orchestrator and scheduler sharing the system clock.
pub async fn bootstrap(
    cfg: &AppConfig,
    sleeper: &dyn Sleeper,
) -> anyhow::Result<(Arc<SyncOrchestrator>, Scheduler)> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = connect_store(&cfg.database_url, &cfg.scheduler.retry_policy(), sleeper).await?;
    let orchestrator = build_orchestrator(cfg, store, Arc::clone(&clock))?;
    let scheduler = build_scheduler(cfg, &orchestrator, clock)?;
    Ok((orchestrator, scheduler))
}
