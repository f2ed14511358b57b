//! Published daily benchmark rates.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One published rate observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RatePoint {
    /// Reference date.
    pub date: NaiveDate,
    /// Rate for that day, in percent (0.0437 means 0.0437% for the day).
    pub rate_pct: f64,
}
