use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Parameters for requesting daily bars from any market data provider.
///
/// Both ends of the range are inclusive calendar dates.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BarsRequestParams {
    /// Provider symbol (e.g., `"BOVA11.SA"`).
    pub symbol: String,

    /// First date requested (inclusive).
    pub start: NaiveDate,

    /// Last date requested (inclusive).
    pub end: NaiveDate,
}

impl BarsRequestParams {
    /// Convenience constructor.
    pub fn new(symbol: impl Into<String>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            symbol: symbol.into(),
            start,
            end,
        }
    }
}
