//! Sync orchestrator: fetcher → indicator engine → writer, per symbol.
//!
//! Symbols are processed one after another; a failing symbol is logged and
//! counted in the [`SyncReport`] and the pass moves on. Two paths exist:
//! the historical-bar path used by the daily job ([`SyncOrchestrator::sync`],
//! [`SyncOrchestrator::sync_index`]) and the live-quote path used by the
//! intraday jobs ([`SyncOrchestrator::refresh_quote`]).

use std::{sync::Arc, time::Instant};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use market_data_ingestor::providers::{DataProvider, QuoteProvider, RateProvider};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    api::ApiError,
    clock::Clock,
    config::{PipelineConfig, SymbolCfg},
    error::SyncError,
    fetcher::{DeltaWindow, IncrementalFetcher, StoredTail, delta_window, stored_tail},
    health::{HealthReport, check_staleness},
    index_series::{self, Anchor},
    indicators::{self, History},
    models::{ObservationRow, SymbolRecord},
    store::{Query, StoreResult, TableStore, tables},
    summary::{self, AssetSummary},
    tickers::{ScaleTable, TickerMap},
    tz::to_rfc3339_millis,
    writer::UpsertWriter,
};

/// External collaborators of the pipeline.
#[derive(Clone)]
pub struct Sources {
    /// Historical daily bars.
    pub bars: Arc<dyn DataProvider>,
    /// Live quotes.
    pub quotes: Arc<dyn QuoteProvider>,
    /// Daily rates for the index series.
    pub rates: Arc<dyn RateProvider>,
}

/// Result of one symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SymbolOutcome {
    /// New rows were written.
    Updated {
        /// Rows written.
        rows: usize,
        /// Close of the newest row.
        last_close: f64,
    },
    /// Nothing new.
    UpToDate,
}

/// A symbol that failed during a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolFailure {
    /// Ticker.
    pub ticker: String,
    /// Rendered error.
    pub message: String,
}

/// Aggregate outcome of a pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    /// Symbols processed.
    pub attempted: usize,
    /// Symbols that changed.
    pub updated: usize,
    /// Symbols with nothing new.
    pub up_to_date: usize,
    /// Symbols that failed.
    pub errored: usize,
    /// Observation rows written.
    pub rows_written: usize,
    /// One entry per failed symbol.
    pub failures: Vec<SymbolFailure>,
    /// Wall-clock start of the pass.
    pub started_at: DateTime<Utc>,
    /// Duration of the pass.
    pub elapsed_ms: u64,
}

impl SyncReport {
    fn start(started_at: DateTime<Utc>) -> Self {
        Self {
            attempted: 0,
            updated: 0,
            up_to_date: 0,
            errored: 0,
            rows_written: 0,
            failures: Vec::new(),
            started_at,
            elapsed_ms: 0,
        }
    }

    /// Folds the outcome of one symbol into the report.
    fn record(&mut self, ticker: &str, outcome: Result<SymbolOutcome, SyncError>) {
        self.attempted += 1;
        match outcome {
            Ok(SymbolOutcome::Updated { rows, .. }) => {
                self.updated += 1;
                self.rows_written += rows;
            }
            Ok(SymbolOutcome::UpToDate) => self.up_to_date += 1,
            Err(e) => {
                error!(%ticker, error = %e, "symbol failed");
                self.errored += 1;
                self.failures.push(SymbolFailure {
                    ticker: ticker.to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    fn finish(mut self, timer: Instant) -> Self {
        self.elapsed_ms = u64::try_from(timer.elapsed().as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// `true` when symbols were attempted and every one failed.
    pub fn all_failed(&self) -> bool {
        self.attempted > 0 && self.errored == self.attempted
    }
}

/// Coordinates the pipeline for a set of symbols.
pub struct SyncOrchestrator {
    store: Arc<dyn TableStore>,
    sources: Sources,
    clock: Arc<dyn Clock>,
    config: PipelineConfig,
    tz: Tz,
    tickers: TickerMap,
    scale: ScaleTable,
}

impl SyncOrchestrator {
    /// Orchestrator over a normalized configuration.
    pub fn new(
        store: Arc<dyn TableStore>,
        sources: Sources,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
    ) -> anyhow::Result<Self> {
        let tz = config.tz()?;
        Ok(Self {
            tickers: config.ticker_map(),
            scale: config.scale_table(),
            store,
            sources,
            clock,
            config,
            tz,
        })
    }

    /// Pipeline configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Backing store.
    pub fn store(&self) -> &Arc<dyn TableStore> {
        &self.store
    }

    /// Today in the pipeline's time zone.
    pub fn today(&self) -> NaiveDate {
        self.clock.today(self.tz)
    }

    /// Current instant.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Staleness check over the configured health tickers.
    pub fn health_check(&self) -> HealthReport {
        let cfg = &self.config.health;
        check_staleness(
            &*self.store,
            &cfg.tickers,
            self.today(),
            cfg.max_age_days,
            self.now(),
        )
    }

    /// Performance summary of `ticker` over the trailing `years`.
    pub fn summary(&self, ticker: &str, years: u32) -> Result<AssetSummary, ApiError> {
        summary::asset_summary(
            &*self.store,
            ticker,
            years,
            self.today(),
            self.config.risk_free_ticker.as_deref(),
        )
    }

    /// Stored observations of `ticker` in `start..=end`.
    pub fn history(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ObservationRow>, ApiError> {
        summary::history(&*self.store, ticker, start, end)
    }

    fn writer(&self) -> UpsertWriter<'_> {
        UpsertWriter::new(&*self.store, self.config.batch_size)
    }

    /// Historical sync of `symbols`.
    pub async fn sync(&self, symbols: &[SymbolCfg]) -> SyncReport {
        let timer = Instant::now();
        let mut report = SyncReport::start(self.clock.now());
        for symbol in symbols {
            let outcome = self.sync_symbol(symbol).await;
            report.record(&symbol.ticker, outcome);
        }
        let report = report.finish(timer);
        info!(
            attempted = report.attempted,
            updated = report.updated,
            errored = report.errored,
            rows = report.rows_written,
            elapsed_ms = report.elapsed_ms,
            "historical sync finished"
        );
        report
    }

    /// Daily pass: every configured symbol, then the index series when
    /// enabled.
    pub async fn sync_all(&self) -> SyncReport {
        let timer = Instant::now();
        let mut report = self.sync(&self.config.symbols).await;
        if self.config.index_series.enabled {
            let outcome = self.sync_index().await;
            report.record(&self.config.index_series.ticker, outcome);
        }
        report.finish(timer)
    }

    /// Historical sync of one symbol.
    pub async fn sync_symbol(&self, symbol: &SymbolCfg) -> Result<SymbolOutcome, SyncError> {
        let ticker = symbol.ticker.as_str();
        let fetcher = IncrementalFetcher::new(
            &*self.store,
            &*self.sources.bars,
            self.config.lookback_years,
        );
        let tail = fetcher.stored_tail(ticker)?;
        let Some(mut rows) = fetcher
            .fetch_delta(ticker, tail.last_date, self.today())
            .await?
        else {
            return Ok(SymbolOutcome::UpToDate);
        };

        apply_indicators(&mut rows, &tail.history);
        self.persist(ticker, &symbol.name, &rows)
    }

    /// Extends the continuity-chained index series.
    pub async fn sync_index(&self) -> Result<SymbolOutcome, SyncError> {
        let cfg = &self.config.index_series;
        let ticker = cfg.ticker.as_str();
        let tail = stored_tail(&*self.store, ticker)?;

        let DeltaWindow::Fetch { start, end } =
            delta_window(tail.last_date, self.today(), cfg.lookback_years)
        else {
            debug!(%ticker, "index series up to date");
            return Ok(SymbolOutcome::UpToDate);
        };

        let rates = self
            .sources
            .rates
            .fetch_rates(cfg.series_code, start, end)
            .await
            .map_err(|source| SyncError::ExternalSource {
                symbol: ticker.to_string(),
                source,
            })?;

        let anchor = anchor_of(&tail);
        if anchor.is_none() {
            info!(%ticker, "no stored index values, starting at base value");
        }
        let mut rows = index_series::chain(ticker, anchor, &rates);
        if rows.is_empty() {
            return Ok(SymbolOutcome::UpToDate);
        }

        apply_indicators(&mut rows, &tail.history);
        self.persist(ticker, &cfg.name, &rows)
    }

    fn persist(
        &self,
        ticker: &str,
        name: &str,
        rows: &[ObservationRow],
    ) -> Result<SymbolOutcome, SyncError> {
        let writer = self.writer();
        let stats = writer.write_observations(rows)?;

        let Some(last) = rows.last() else {
            return Ok(SymbolOutcome::UpToDate);
        };
        writer.upsert_symbol(&SymbolRecord {
            ticker: ticker.to_string(),
            name: name.to_string(),
            current_price: Some(last.close),
            updated_at: Some(to_rfc3339_millis(self.clock.now())),
        })?;

        info!(%ticker, rows = stats.rows, last_date = %last.date, last_close = last.close, "symbol synced");
        Ok(SymbolOutcome::Updated {
            rows: stats.rows,
            last_close: last.close,
        })
    }

    /// Refreshes the current price of `ticker` from the live quote source.
    ///
    /// Failures are logged and reported as `false`.
    pub async fn refresh_quote(&self, ticker: &str) -> bool {
        match self.try_refresh_quote(ticker).await {
            Ok(price) => price.is_some(),
            Err(e) => {
                warn!(%ticker, error = %e, "quote refresh failed");
                false
            }
        }
    }

    /// Like [`refresh_quote`](Self::refresh_quote) but keeps the error.
    ///
    /// Returns the stored price, or `None` when the symbol has no metadata
    /// row yet.
    pub async fn try_refresh_quote(&self, ticker: &str) -> Result<Option<f64>, SyncError> {
        let code = self.tickers.quote_code(ticker);
        let quote = self
            .sources
            .quotes
            .fetch_quote(&code)
            .await
            .map_err(|source| SyncError::ExternalSource {
                symbol: ticker.to_string(),
                source,
            })?;

        let value = quote
            .numeric_value()
            .filter(|v| v.is_finite() && *v > 0.0)
            .ok_or_else(|| SyncError::Validation {
                symbol: ticker.to_string(),
                field: "quote",
                value: quote.value.clone(),
            })?;
        let price = self.scale.apply(ticker, value);

        let updated = self.writer().update_price(ticker, price, self.clock.now())?;
        if !updated {
            warn!(%ticker, "no symbol row to refresh");
            return Ok(None);
        }
        debug!(%ticker, %code, price, "price refreshed");
        Ok(Some(price))
    }

    /// Live-quote pass over every stored symbol except the index series.
    pub async fn refresh_quotes(&self) -> SyncReport {
        let timer = Instant::now();
        let mut report = SyncReport::start(self.clock.now());

        let tickers = match self.quote_tickers() {
            Ok(t) => t,
            Err(e) => {
                report.record("*", Err(e.into()));
                return report.finish(timer);
            }
        };

        for ticker in &tickers {
            let outcome = self.try_refresh_quote(ticker).await.map(|price| match price {
                Some(last_close) => SymbolOutcome::Updated { rows: 0, last_close },
                None => SymbolOutcome::UpToDate,
            });
            report.record(ticker, outcome);
        }

        let report = report.finish(timer);
        info!(
            attempted = report.attempted,
            updated = report.updated,
            errored = report.errored,
            elapsed_ms = report.elapsed_ms,
            "quote refresh finished"
        );
        report
    }

    fn quote_tickers(&self) -> StoreResult<Vec<String>> {
        let q = Query::select(tables::SYMBOLS)
            .columns(&["ticker"])
            .order_asc("ticker")
            .build();
        let index_ticker = &self.config.index_series.ticker;
        Ok(self
            .store
            .select(&q)?
            .data
            .iter()
            .filter_map(|r| r.get("ticker").and_then(|v| v.as_str()))
            .filter(|t| *t != index_ticker)
            .map(str::to_string)
            .collect())
    }
}

fn anchor_of(tail: &StoredTail) -> Option<Anchor> {
    Some(Anchor {
        date: tail.last_date?,
        value: tail.last_close()?,
    })
}

/// Fills derived fields of `rows` continuing after `history`. A daily
/// return already set by the producer is kept.
pub fn apply_indicators(rows: &mut [ObservationRow], history: &History) {
    let closes: Vec<f64> = rows.iter().map(|r| r.close).collect();
    let points = indicators::compute_seeded(history, &closes);
    for (row, p) in rows.iter_mut().zip(points) {
        row.daily_return = row.daily_return.or(p.daily_return);
        row.ma20 = p.ma20;
        row.upper_band = p.upper_band;
        row.lower_band = p.lower_band;
        row.peak = Some(p.peak);
        row.drawdown = Some(p.drawdown);
    }
}
