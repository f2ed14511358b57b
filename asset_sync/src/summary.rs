//! Stored-history queries for API-style callers: paged history reads and
//! the per-asset performance summary.

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::{
    api::ApiError,
    indicators::{self, PricePoint},
    models::{ObservationRow, SymbolRecord},
    store::{Query, StoreResult, TableStore, tables},
};

/// Rows per paged read.
pub const PAGE_SIZE: usize = 1000;
/// Longest summary window, in years.
pub const MAX_YEARS: u32 = 30;

/// Reads every observation of `ticker` in `start..=end`, oldest first.
pub fn load_observations(
    store: &dyn TableStore,
    ticker: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> StoreResult<Vec<ObservationRow>> {
    let mut out = Vec::new();
    let mut offset = 0;
    loop {
        let q = Query::select(tables::OBSERVATIONS)
            .eq("ticker", ticker)
            .gte("date", start.to_string())
            .lte("date", end.to_string())
            .order_asc("date")
            .limit(PAGE_SIZE)
            .offset(offset)
            .build();
        let page = store.select(&q)?.data;
        let n = page.len();
        for r in &page {
            out.push(ObservationRow::from_row(r)?);
        }
        if n < PAGE_SIZE {
            return Ok(out);
        }
        offset += n;
    }
}

fn load_closes(
    store: &dyn TableStore,
    ticker: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> StoreResult<Vec<PricePoint>> {
    Ok(load_observations(store, ticker, start, end)?
        .into_iter()
        .map(|r| PricePoint {
            date: r.date,
            close: r.close,
        })
        .collect())
}

fn symbol(store: &dyn TableStore, ticker: &str) -> StoreResult<Option<SymbolRecord>> {
    let q = Query::select(tables::SYMBOLS).eq("ticker", ticker).limit(1).build();
    store
        .select(&q)?
        .first()
        .map(SymbolRecord::from_row)
        .transpose()
}

/// Stored observations of `ticker` between `start` and `end`, inclusive.
///
/// Errors:
/// - `BadRequest` for an empty ticker or `start > end`
/// - `NotFound` when the ticker is unknown
pub fn history(
    store: &dyn TableStore,
    ticker: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<ObservationRow>, ApiError> {
    let ticker = ticker.trim();
    if ticker.is_empty() {
        return Err(ApiError::bad_request("ticker is required"));
    }
    if start > end {
        return Err(ApiError::bad_request(format!(
            "start {start} is after end {end}"
        )));
    }
    let rows = load_observations(store, ticker, start, end)?;
    if rows.is_empty() && symbol(store, ticker)?.is_none() {
        return Err(ApiError::not_found(format!("unknown ticker `{ticker}`")));
    }
    Ok(rows)
}

/// Performance of one asset over a trailing window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetSummary {
    /// Ticker.
    pub ticker: String,
    /// Display name, when the symbol row exists.
    pub name: Option<String>,
    /// First date of the requested window.
    pub start: NaiveDate,
    /// Last date of the requested window.
    pub end: NaiveDate,
    /// Observations inside the window.
    pub observations: usize,
    /// Most recent close.
    pub last_close: f64,
    /// Percent change over the window.
    pub cumulative_return: Option<f64>,
    /// Compound annual return, percent.
    pub annualized_return: Option<f64>,
    /// Annualized volatility, percent.
    pub volatility: Option<f64>,
    /// Deepest drawdown in the window, percent.
    pub max_drawdown: Option<f64>,
    /// Sharpe ratio against `risk_free_rate`.
    pub sharpe_ratio: Option<f64>,
    /// Annualized risk-free return used, percent.
    pub risk_free_rate: f64,
}

/// Summarizes `ticker` over the `years` before `today`.
///
/// The risk-free rate is the annualized return of `risk_free_ticker` over
/// the same window, or zero when it is unavailable.
pub fn asset_summary(
    store: &dyn TableStore,
    ticker: &str,
    years: u32,
    today: NaiveDate,
    risk_free_ticker: Option<&str>,
) -> Result<AssetSummary, ApiError> {
    let ticker = ticker.trim();
    if ticker.is_empty() {
        return Err(ApiError::bad_request("ticker is required"));
    }
    if years == 0 || years > MAX_YEARS {
        return Err(ApiError::bad_request(format!(
            "years must be between 1 and {MAX_YEARS}, got {years}"
        )));
    }

    let start = today - Duration::days(365 * i64::from(years));
    let points = load_closes(store, ticker, start, today)?;
    let Some(last) = points.last() else {
        return Err(ApiError::not_found(format!(
            "no observations for `{ticker}` since {start}"
        )));
    };

    let risk_free_rate = match risk_free_ticker {
        Some(rf) if rf != ticker => {
            indicators::annualized_return(&load_closes(store, rf, start, today)?).unwrap_or(0.0)
        }
        _ => 0.0,
    };

    let annualized_return = indicators::annualized_return(&points);
    let volatility = indicators::annualized_volatility(&points);
    Ok(AssetSummary {
        ticker: ticker.to_string(),
        name: symbol(store, ticker)?.map(|s| s.name),
        start,
        end: today,
        observations: points.len(),
        last_close: last.close,
        cumulative_return: indicators::cumulative_return(&points),
        annualized_return,
        volatility,
        max_drawdown: indicators::max_drawdown(&points),
        sharpe_ratio: indicators::sharpe_ratio(annualized_return, volatility, risk_free_rate),
        risk_free_rate,
    })
}
