//! Pipeline configuration: parsing, defaults, and validation.
//!
//! The pipeline reads the `[pipeline]` table of the service's TOML file
//! into [`PipelineConfig`]. Every field has a default, so an empty table
//! describes the stock deployment: six B3/FX symbols, the CDI index, the
//! RTD quote bridge and the staleness check.
//!
//! Normalization trims tickers, drops duplicate symbols while preserving
//! order, and rejects unusable values (empty tickers, zero batch size,
//! non-positive scale factors, unknown time zones).
//!
//! Entrypoints:
//! - Parse + normalize from a TOML string: [`load_config_str`]
//! - Parse + normalize from a file path: [`load_config_path`]
//! - Normalize an already deserialized value: [`normalize_config`]

use std::{collections::HashSet, path::Path, time::Duration};

use anyhow::{Context, bail};
use chrono_tz::Tz;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    tickers::{ScaleTable, TickerMap},
    tz::parse_tz,
};

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    /// IANA zone that defines "today".
    pub timezone: String,
    /// History requested for a symbol with no stored observations.
    pub lookback_years: u32,
    /// Rows per upsert batch.
    pub batch_size: usize,
    /// Timeout for every outbound HTTP request, in seconds.
    pub http_timeout_secs: u64,
    /// Symbols synced from the historical bar source.
    pub symbols: Vec<SymbolCfg>,
    /// Continuity-chained index series.
    pub index_series: IndexSeriesCfg,
    /// Live quote settings.
    pub quotes: QuotesCfg,
    /// Staleness check settings.
    pub health: HealthCfg,
    /// Ticker whose annualized return is the Sharpe risk-free rate.
    pub risk_free_ticker: Option<String>,
}

/// One tracked symbol.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SymbolCfg {
    /// Ticker in the historical source's naming.
    pub ticker: String,
    /// Display name.
    pub name: String,
}

/// Continuity-chained index series built from a published daily rate.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct IndexSeriesCfg {
    /// Whether the daily sync builds the series.
    pub enabled: bool,
    /// Ticker the indexed values are stored under.
    pub ticker: String,
    /// Display name.
    pub name: String,
    /// Number of the rate series at the rate source.
    pub series_code: u32,
    /// History requested on the first run.
    pub lookback_years: u32,
}

/// Live quote settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct QuotesCfg {
    /// Quote bridge base URL.
    pub base_url: String,
    /// Field requested from the bridge.
    pub field: String,
    /// Minimum spacing between two quote requests, in milliseconds.
    pub min_interval_ms: u64,
    /// Explicit tracked-ticker → quote-code exceptions.
    pub ticker_map: IndexMap<String, String>,
    /// Per-ticker factors applied to quoted values.
    pub scale: IndexMap<String, f64>,
}

/// Staleness check settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields, default)]
pub struct HealthCfg {
    /// Tickers whose latest observation is checked.
    pub tickers: Vec<String>,
    /// Age, in days, above which a ticker is stale.
    pub max_age_days: i64,
}

impl SymbolCfg {
    fn new(ticker: &str, name: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            name: name.to_string(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            timezone: "America/Sao_Paulo".to_string(),
            lookback_years: 5,
            batch_size: 100,
            http_timeout_secs: 10,
            symbols: vec![
                SymbolCfg::new("BOVA11.SA", "BOVA11 (Ibovespa)"),
                SymbolCfg::new("XFIX11.SA", "XFIX11 (IFIX)"),
                SymbolCfg::new("IB5M11.SA", "IB5M11 (IMAB5+)"),
                SymbolCfg::new("B5P211.SA", "B5P211 (IMAB5)"),
                SymbolCfg::new("FIXA11.SA", "FIXA11 (Pré)"),
                SymbolCfg::new("USDBRL=X", "USD/BRL (Dólar)"),
            ],
            index_series: IndexSeriesCfg::default(),
            quotes: QuotesCfg::default(),
            health: HealthCfg::default(),
            risk_free_ticker: Some("CDI".to_string()),
        }
    }
}

impl Default for IndexSeriesCfg {
    fn default() -> Self {
        Self {
            enabled: true,
            ticker: "CDI".to_string(),
            name: "CDI".to_string(),
            series_code: 12,
            lookback_years: 9,
        }
    }
}

impl Default for QuotesCfg {
    fn default() -> Self {
        let ticker_map = [
            ("BOVA11.SA", "BOVA11"),
            ("XFIX11.SA", "XFIX11"),
            ("IB5M11.SA", "IB5M11"),
            ("B5P211.SA", "B5P211"),
            ("FIXA11.SA", "FIXA11"),
            ("USDBRL=X", "WDOFUT"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self {
            base_url: "http://rtd.blackboxinovacao.com.br/api/MarketData".to_string(),
            field: "ULT".to_string(),
            min_interval_ms: 200,
            ticker_map,
            scale: IndexMap::from([("USDBRL=X".to_string(), 0.001)]),
        }
    }
}

impl Default for HealthCfg {
    fn default() -> Self {
        Self {
            tickers: ["BOVA11.SA", "CDI", "XFIX11.SA", "IB5M11.SA"]
                .map(String::from)
                .to_vec(),
            max_age_days: 3,
        }
    }
}

impl PipelineConfig {
    /// Parsed time zone. Valid after [`normalize_config`].
    pub fn tz(&self) -> anyhow::Result<Tz> {
        parse_tz(&self.timezone)
    }

    /// HTTP timeout as a [`Duration`].
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Ticker equivalence table for the quote source.
    pub fn ticker_map(&self) -> TickerMap {
        TickerMap::new(self.quotes.ticker_map.clone())
    }

    /// Quote scaling table.
    pub fn scale_table(&self) -> ScaleTable {
        ScaleTable::new(self.quotes.scale.clone())
    }

    /// Display name for a tracked ticker, falling back to the ticker.
    pub fn display_name(&self, ticker: &str) -> String {
        self.symbols
            .iter()
            .find(|s| s.ticker == ticker)
            .map(|s| s.name.clone())
            .or_else(|| {
                (self.index_series.ticker == ticker).then(|| self.index_series.name.clone())
            })
            .unwrap_or_else(|| ticker.to_string())
    }
}

/// Summary of changes performed during normalization.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct NormalizationReport {
    /// Duplicate symbols removed.
    pub symbols_deduped: usize,
    /// Duplicate health tickers removed.
    pub health_tickers_deduped: usize,
}

/// Normalize and validate a configuration in place.
///
/// Errors:
/// - Unknown time zone
/// - Zero lookback, batch size or HTTP timeout
/// - Empty tickers or names after trimming
/// - Non-positive or non-finite scale factors
pub fn normalize_config(cfg: &mut PipelineConfig) -> anyhow::Result<NormalizationReport> {
    let mut report = NormalizationReport::default();

    cfg.timezone = cfg.timezone.trim().to_string();
    cfg.tz()?;
    if cfg.lookback_years == 0 {
        bail!("lookback_years must be at least 1");
    }
    if cfg.batch_size == 0 {
        bail!("batch_size must be at least 1");
    }
    if cfg.http_timeout_secs == 0 {
        bail!("http_timeout_secs must be at least 1");
    }

    let before = cfg.symbols.len();
    let mut seen = HashSet::new();
    let mut symbols = Vec::with_capacity(before);
    for mut s in std::mem::take(&mut cfg.symbols) {
        s.ticker = s.ticker.trim().to_string();
        s.name = s.name.trim().to_string();
        if s.ticker.is_empty() {
            bail!("symbol ticker cannot be empty after trimming");
        }
        if s.name.is_empty() {
            s.name = s.ticker.clone();
        }
        if seen.insert(s.ticker.clone()) {
            symbols.push(s);
        }
    }
    report.symbols_deduped = before - symbols.len();
    cfg.symbols = symbols;

    let idx = &mut cfg.index_series;
    idx.ticker = idx.ticker.trim().to_string();
    if idx.ticker.is_empty() {
        bail!("index_series.ticker cannot be empty after trimming");
    }
    if idx.lookback_years == 0 {
        bail!("index_series.lookback_years must be at least 1");
    }
    if cfg.symbols.iter().any(|s| s.ticker == idx.ticker) {
        bail!("index series {} is also listed as a symbol", idx.ticker);
    }

    for (ticker, factor) in &cfg.quotes.scale {
        if !factor.is_finite() || *factor <= 0.0 {
            bail!("scale factor for {ticker} must be positive, got {factor}");
        }
    }
    cfg.quotes.base_url = cfg.quotes.base_url.trim().trim_end_matches('/').to_string();

    let before = cfg.health.tickers.len();
    let mut seen = HashSet::new();
    cfg.health.tickers = std::mem::take(&mut cfg.health.tickers)
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty() && seen.insert(t.clone()))
        .collect();
    report.health_tickers_deduped = before - cfg.health.tickers.len();
    if cfg.health.max_age_days < 0 {
        bail!("health.max_age_days cannot be negative");
    }

    Ok(report)
}

/// Parse a TOML string into a [`PipelineConfig`] and normalize it.
pub fn load_config_str(s: &str) -> anyhow::Result<PipelineConfig> {
    let mut cfg: PipelineConfig = toml::from_str(s).context("parse pipeline config")?;
    normalize_config(&mut cfg)?;
    Ok(cfg)
}

/// Read a TOML file from disk, parse, and normalize it.
pub fn load_config_path(path: impl AsRef<Path>) -> anyhow::Result<PipelineConfig> {
    let path = path.as_ref();
    let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    load_config_str(&s)
}
