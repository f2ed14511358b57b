//! Ticker equivalence and quote scaling tables.
//!
//! Tracked tickers use the historical source's naming (`BOVA11.SA`,
//! `USDBRL=X`); the live quote source uses exchange codes (`BOVA11`,
//! `WDOFUT`). [`TickerMap`] holds the explicit exceptions and falls back to
//! a default rewrite. [`ScaleTable`] holds per-ticker factors for sources
//! that quote in a different unit than the store (the dollar future is
//! quoted per 1000 USD).

use indexmap::IndexMap;

/// Explicit ticker equivalences with a default rule for everything else.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickerMap {
    explicit: IndexMap<String, String>,
}

impl TickerMap {
    /// Map with the given exceptions.
    pub fn new(explicit: IndexMap<String, String>) -> Self {
        Self { explicit }
    }

    /// Live-quote code for a tracked ticker.
    pub fn quote_code(&self, ticker: &str) -> String {
        self.explicit
            .get(ticker)
            .cloned()
            .unwrap_or_else(|| default_quote_code(ticker))
    }
}

/// Drops the exchange suffix (everything from the first `.`) and any `=`.
pub fn default_quote_code(ticker: &str) -> String {
    let base = ticker.split('.').next().unwrap_or(ticker);
    base.replace('=', "")
}

/// Per-ticker multiplicative factors applied to live quotes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScaleTable {
    factors: IndexMap<String, f64>,
}

impl ScaleTable {
    /// Table with the given factors.
    pub fn new(factors: IndexMap<String, f64>) -> Self {
        Self { factors }
    }

    /// Factor for `ticker`; `1.0` when none is declared.
    pub fn factor(&self, ticker: &str) -> f64 {
        self.factors.get(ticker).copied().unwrap_or(1.0)
    }

    /// `value × factor(ticker)`.
    pub fn apply(&self, ticker: &str, value: f64) -> f64 {
        value * self.factor(ticker)
    }
}
