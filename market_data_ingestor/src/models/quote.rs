//! Live last-trade quotes and their textual number format.

use serde::{Deserialize, Serialize};

/// A raw quote as delivered by a live quote source.
///
/// The value is kept as text because sources format numbers with the
/// locale of the exchange (`"5,4321"` as well as `"5.4321"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Symbol as requested from the source.
    pub symbol: String,
    /// Raw textual value.
    pub value: String,
}

impl Quote {
    /// Parses [`Quote::value`] with [`parse_locale_decimal`].
    pub fn numeric_value(&self) -> Option<f64> {
        parse_locale_decimal(&self.value)
    }
}

/// Parses a decimal number written with either `.` or `,` as the decimal
/// separator.
///
/// When both separators are present the last one is the decimal separator
/// and the other is treated as a thousands grouping (`"1.234,56"` and
/// `"1,234.56"` both give `1234.56`). Returns `None` for empty, malformed or
/// non-finite input.
pub fn parse_locale_decimal(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    let normalized = match (s.rfind(','), s.rfind('.')) {
        (Some(c), Some(d)) if c > d => s.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => s.replace(',', ""),
        (Some(_), None) => s.replace(',', "."),
        _ => s.to_string(),
    };
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}
