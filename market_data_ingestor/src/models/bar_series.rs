//! A collection of daily bars for a specific symbol.

use crate::models::bar::Bar;

/// Represents a complete set of time-series data for a single symbol.
///
/// Bars are ordered by date ascending as delivered by the provider.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BarSeries {
    /// The symbol this data represents (e.g., "BOVA11.SA", "USDBRL=X").
    pub symbol: String,
    /// The collection of OHLCV bars.
    pub bars: Vec<Bar>,
}

impl BarSeries {
    /// Creates a series for `symbol`.
    pub fn new(symbol: impl Into<String>, bars: Vec<Bar>) -> Self {
        Self {
            symbol: symbol.into(),
            bars,
        }
    }

    /// `true` when the provider returned no bars for the window.
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }
}
