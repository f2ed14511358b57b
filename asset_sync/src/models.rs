//! Persisted record shapes.
//!
//! Each model converts to and from the store's [`Row`] so the pipeline can
//! stay typed while talking to any [`TableStore`](crate::store::TableStore).

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{Row, StoreError, row};

/// One (ticker, date) daily observation with its derived indicators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRow {
    /// Ticker as tracked (e.g. `BOVA11.SA`, `CDI`).
    pub ticker: String,
    /// Trading date.
    pub date: NaiveDate,
    /// Opening price.
    pub open: Option<f64>,
    /// Session high.
    pub high: Option<f64>,
    /// Session low.
    pub low: Option<f64>,
    /// Closing price (or indexed value for index series).
    pub close: f64,
    /// Traded volume.
    pub volume: Option<f64>,
    /// Percent change from the previous close.
    pub daily_return: Option<f64>,
    /// 20-session moving average.
    pub ma20: Option<f64>,
    /// `ma20 + 2σ`.
    pub upper_band: Option<f64>,
    /// `ma20 - 2σ`.
    pub lower_band: Option<f64>,
    /// Highest close so far.
    pub peak: Option<f64>,
    /// Percent below `peak`; never positive.
    pub drawdown: Option<f64>,
}

impl ObservationRow {
    /// Observation with prices only; indicators unset.
    pub fn new(ticker: impl Into<String>, date: NaiveDate, close: f64) -> Self {
        Self {
            ticker: ticker.into(),
            date,
            open: None,
            high: None,
            low: None,
            close,
            volume: None,
            daily_return: None,
            ma20: None,
            upper_band: None,
            lower_band: None,
            peak: None,
            drawdown: None,
        }
    }

    /// Store representation. Dates are ISO `YYYY-MM-DD` text.
    pub fn to_row(&self) -> Row {
        row([
            ("ticker", Value::from(self.ticker.as_str())),
            ("date", Value::from(self.date.to_string())),
            ("open", Value::from(self.open)),
            ("high", Value::from(self.high)),
            ("low", Value::from(self.low)),
            ("close", Value::from(self.close)),
            ("volume", Value::from(self.volume)),
            ("daily_return", Value::from(self.daily_return)),
            ("ma20", Value::from(self.ma20)),
            ("upper_band", Value::from(self.upper_band)),
            ("lower_band", Value::from(self.lower_band)),
            ("peak", Value::from(self.peak)),
            ("drawdown", Value::from(self.drawdown)),
        ])
    }

    /// Decodes a full store row.
    pub fn from_row(row: &Row) -> Result<Self, StoreError> {
        decode(row)
    }
}

/// Symbol metadata: one row per tracked ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolRecord {
    /// Ticker, primary key.
    pub ticker: String,
    /// Display name.
    pub name: String,
    /// Latest known price.
    pub current_price: Option<f64>,
    /// RFC-3339 UTC timestamp of the last price change.
    pub updated_at: Option<String>,
}

impl SymbolRecord {
    /// Store representation.
    pub fn to_row(&self) -> Row {
        row([
            ("ticker", Value::from(self.ticker.as_str())),
            ("name", Value::from(self.name.as_str())),
            ("current_price", Value::from(self.current_price)),
            ("updated_at", Value::from(self.updated_at.clone())),
        ])
    }

    /// Decodes a full store row.
    pub fn from_row(row: &Row) -> Result<Self, StoreError> {
        decode(row)
    }
}

fn decode<T: serde::de::DeserializeOwned>(row: &Row) -> Result<T, StoreError> {
    let object: serde_json::Map<String, Value> =
        row.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    Ok(serde_json::from_value(Value::Object(object))?)
}
