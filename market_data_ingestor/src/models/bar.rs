//! Canonical in-memory representation of a daily bar (OHLCV).
//!
//! This struct is used as the standard output for all [`DataProvider`](crate::providers::DataProvider)
//! implementations. Fields are optional because upstream feeds regularly
//! leave holes (holidays, halted sessions, partial prints); deciding what to
//! do with a hole is the consumer's job.

use chrono::NaiveDate;

/// A single daily bar for a given exchange-local trading date.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    /// Trading date in the exchange's local calendar.
    pub date: NaiveDate,

    /// Opening price.
    pub open: Option<f64>,

    /// Highest price during the session.
    pub high: Option<f64>,

    /// Lowest price during the session.
    pub low: Option<f64>,

    /// Closing price.
    pub close: Option<f64>,

    /// Volume traded during the session.
    pub volume: Option<f64>,
}

impl Bar {
    /// Bar with every price field set to `close`, as used by fixtures and
    /// synthetic series.
    pub fn flat(date: NaiveDate, close: f64) -> Self {
        Self {
            date,
            open: Some(close),
            high: Some(close),
            low: Some(close),
            close: Some(close),
            volume: Some(0.0),
        }
    }
}
