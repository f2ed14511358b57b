//! Incremental fetcher: what is stored, what is missing, and the delta.
//!
//! The stored tail of a ticker (last date, trailing closes, running peak)
//! is read from the store; the delta window starts the day after the last
//! stored date, or a full lookback before today when nothing is stored.
//! Windows of one day or less are treated as up to date without calling
//! the source.

use chrono::{Duration, NaiveDate};
use market_data_ingestor::{
    models::{bar::Bar, request_params::BarsRequestParams},
    providers::DataProvider,
};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    error::SyncError,
    indicators::{History, MA_WINDOW},
    models::ObservationRow,
    store::{Query, Row, StoreError, StoreResult, TableStore, tables},
};

/// Default history requested for a ticker with nothing stored.
pub const DEFAULT_LOOKBACK_YEARS: u32 = 5;

/// Range to request from a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaWindow {
    /// Nothing to request.
    UpToDate,
    /// Request `start..=end`.
    Fetch {
        /// First missing date.
        start: NaiveDate,
        /// Today.
        end: NaiveDate,
    },
}

/// Computes the delta window for a ticker.
pub fn delta_window(
    last_known: Option<NaiveDate>,
    today: NaiveDate,
    lookback_years: u32,
) -> DeltaWindow {
    let start = match last_known {
        Some(last) => last + Duration::days(1),
        None => today - Duration::days(365 * i64::from(lookback_years)),
    };
    if start >= today || (today - start).num_days() <= 1 {
        return DeltaWindow::UpToDate;
    }
    DeltaWindow::Fetch { start, end: today }
}

/// What the store already holds for a ticker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredTail {
    /// Most recent stored date.
    pub last_date: Option<NaiveDate>,
    /// Trailing closes and running peak to continue indicators from.
    pub history: History,
}

impl StoredTail {
    /// Last stored close.
    pub fn last_close(&self) -> Option<f64> {
        self.history.closes.last().copied()
    }
}

/// Reads stored state and fetches deltas for one ticker at a time.
pub struct IncrementalFetcher<'a> {
    store: &'a dyn TableStore,
    bars: &'a dyn DataProvider,
    lookback_years: u32,
}

impl<'a> IncrementalFetcher<'a> {
    /// Fetcher over `store` and `bars`.
    pub fn new(store: &'a dyn TableStore, bars: &'a dyn DataProvider, lookback_years: u32) -> Self {
        Self {
            store,
            bars,
            lookback_years,
        }
    }

    /// Most recent stored date for `ticker`.
    pub fn last_known_date(&self, ticker: &str) -> StoreResult<Option<NaiveDate>> {
        last_known_date(self.store, ticker)
    }

    /// Last stored date plus the trailing closes indicators depend on.
    pub fn stored_tail(&self, ticker: &str) -> StoreResult<StoredTail> {
        stored_tail(self.store, ticker)
    }

    /// Fetches and validates observations after `last_known`.
    ///
    /// Returns `Ok(None)` when the window is up to date or the source had
    /// nothing usable.
    pub async fn fetch_delta(
        &self,
        ticker: &str,
        last_known: Option<NaiveDate>,
        today: NaiveDate,
    ) -> Result<Option<Vec<ObservationRow>>, SyncError> {
        let DeltaWindow::Fetch { start, end } = delta_window(last_known, today, self.lookback_years)
        else {
            debug!(%ticker, ?last_known, "already up to date");
            return Ok(None);
        };

        debug!(%ticker, %start, %end, "fetching delta");
        let series = self
            .bars
            .fetch_bars(BarsRequestParams::new(ticker, start, end))
            .await
            .map_err(|source| SyncError::ExternalSource {
                symbol: ticker.to_string(),
                source,
            })?;

        let rows = normalize_bars(ticker, series.bars, last_known);
        Ok((!rows.is_empty()).then_some(rows))
    }
}

/// Most recent stored date for `ticker`.
pub fn last_known_date(store: &dyn TableStore, ticker: &str) -> StoreResult<Option<NaiveDate>> {
    let q = Query::select(tables::OBSERVATIONS)
        .columns(&["date"])
        .eq("ticker", ticker)
        .order_desc("date")
        .limit(1)
        .build();
    store
        .select(&q)?
        .first()
        .map(|r| date_of(r))
        .transpose()
}

/// Last stored date plus the trailing closes indicators depend on.
pub fn stored_tail(store: &dyn TableStore, ticker: &str) -> StoreResult<StoredTail> {
    let q = Query::select(tables::OBSERVATIONS)
        .columns(&["date", "close", "peak"])
        .eq("ticker", ticker)
        .order_desc("date")
        .limit(MA_WINDOW - 1)
        .build();
    let rows = store.select(&q)?.data;
    let Some(latest) = rows.first() else {
        return Ok(StoredTail::default());
    };

    let last_date = Some(date_of(latest)?);
    let closes: Vec<f64> = rows
        .iter()
        .rev()
        .filter_map(|r| r.get("close").and_then(Value::as_f64))
        .collect();
    let peak = latest
        .get("peak")
        .and_then(Value::as_f64)
        .or_else(|| closes.iter().copied().reduce(f64::max));

    Ok(StoredTail {
        last_date,
        history: History { closes, peak },
    })
}

fn date_of(row: &Row) -> StoreResult<NaiveDate> {
    let raw = row.get("date").cloned().unwrap_or(Value::Null);
    serde_json::from_value(raw).map_err(StoreError::from)
}

fn usable_price(v: Option<f64>) -> Option<f64> {
    v.filter(|p| p.is_finite() && *p > 0.0)
}

/// Validates raw bars into observation rows.
///
/// - rows without a usable close are dropped
/// - unusable open/high/low/volume are nulled
/// - rows on or before `after` are discarded
/// - output is sorted by date with one row per date (last one wins)
pub fn normalize_bars(
    ticker: &str,
    bars: Vec<Bar>,
    after: Option<NaiveDate>,
) -> Vec<ObservationRow> {
    let mut rows: Vec<ObservationRow> = Vec::with_capacity(bars.len());
    for bar in bars {
        if after.is_some_and(|a| bar.date <= a) {
            continue;
        }
        let Some(close) = usable_price(bar.close) else {
            warn!(%ticker, date = %bar.date, close = ?bar.close, "dropping row without a usable close");
            continue;
        };
        let mut row = ObservationRow::new(ticker, bar.date, close);
        row.open = usable_price(bar.open);
        row.high = usable_price(bar.high);
        row.low = usable_price(bar.low);
        row.volume = bar.volume.filter(|v| v.is_finite() && *v >= 0.0);
        rows.push(row);
    }

    rows.sort_by_key(|r| r.date);
    let before = rows.len();
    // keep the last row of every date
    rows.reverse();
    rows.dedup_by_key(|r| r.date);
    rows.reverse();
    if rows.len() != before {
        warn!(%ticker, duplicates = before - rows.len(), "source repeated dates");
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn no_history_requests_full_lookback() {
        let today = d(2024, 6, 10);
        assert_eq!(
            delta_window(None, today, 5),
            DeltaWindow::Fetch {
                start: today - Duration::days(5 * 365),
                end: today
            }
        );
    }

    #[test]
    fn window_starts_the_day_after_last_known() {
        assert_eq!(
            delta_window(Some(d(2024, 6, 5)), d(2024, 6, 10), 5),
            DeltaWindow::Fetch {
                start: d(2024, 6, 6),
                end: d(2024, 6, 10)
            }
        );
    }

    #[test]
    fn tiny_windows_are_up_to_date() {
        let today = d(2024, 6, 10);
        assert_eq!(delta_window(Some(today), today, 5), DeltaWindow::UpToDate);
        assert_eq!(delta_window(Some(d(2024, 6, 9)), today, 5), DeltaWindow::UpToDate);
        assert_eq!(delta_window(Some(d(2024, 6, 8)), today, 5), DeltaWindow::UpToDate);
        assert_eq!(delta_window(Some(d(2024, 6, 20)), today, 5), DeltaWindow::UpToDate);
    }

    #[test]
    fn normalization_drops_nulls_and_duplicates() {
        let mut bad = Bar::flat(d(2024, 1, 3), 10.0);
        bad.close = Some(f64::NAN);
        let mut neg_volume = Bar::flat(d(2024, 1, 4), 11.0);
        neg_volume.volume = Some(-5.0);
        neg_volume.low = None;
        let bars = vec![
            Bar::flat(d(2024, 1, 5), 12.0),
            bad,
            Bar::flat(d(2024, 1, 2), 9.0),
            neg_volume,
            Bar::flat(d(2024, 1, 5), 12.5),
            Bar::flat(d(2024, 1, 1), 8.0),
        ];
        let rows = normalize_bars("X", bars, Some(d(2024, 1, 1)));
        let dates: Vec<_> = rows.iter().map(|r| r.date).collect();
        assert_eq!(dates, vec![d(2024, 1, 2), d(2024, 1, 4), d(2024, 1, 5)]);
        assert_eq!(rows[1].volume, None);
        assert_eq!(rows[1].low, None);
        assert_eq!(rows[2].close, 12.5);
    }
}
