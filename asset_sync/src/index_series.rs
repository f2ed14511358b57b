//! Continuity-chained index built from a published daily rate.
//!
//! Each new value compounds the previous one by that day's rate, so the
//! stored series never jumps between runs. The first run has no anchor and
//! starts at [`BASE_VALUE`].

use chrono::NaiveDate;
use market_data_ingestor::models::rate::RatePoint;

use crate::models::ObservationRow;

/// Value of the first point of a series built from scratch.
pub const BASE_VALUE: f64 = 100.0;

/// Last stored point the new values continue from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Anchor {
    /// Date of the last stored value.
    pub date: NaiveDate,
    /// Last stored value.
    pub value: f64,
}

/// Chains `rates` into index observations for `ticker`.
///
/// With an anchor, `value_i = anchor × Π(1 + r_k / 100)` over the rates
/// after the anchor date. Without one, the first rate date is valued
/// [`BASE_VALUE`] and later dates compound from there. Every row's
/// `daily_return` is that day's rate. Open, high and low equal the value
/// and volume is zero.
pub fn chain(ticker: &str, anchor: Option<Anchor>, rates: &[RatePoint]) -> Vec<ObservationRow> {
    let mut points: Vec<&RatePoint> = rates
        .iter()
        .filter(|p| p.rate_pct.is_finite())
        .filter(|p| anchor.is_none_or(|a| p.date > a.date))
        .collect();
    points.sort_by_key(|p| p.date);
    points.dedup_by_key(|p| p.date);

    let mut value = anchor.map(|a| a.value);
    points
        .into_iter()
        .map(|p| {
            let next = match value {
                Some(prev) => prev * (1.0 + p.rate_pct / 100.0),
                None => BASE_VALUE,
            };
            value = Some(next);

            let mut row = ObservationRow::new(ticker, p.date, next);
            row.open = Some(next);
            row.high = Some(next);
            row.low = Some(next);
            row.volume = Some(0.0);
            row.daily_return = Some(p.rate_pct);
            row
        })
        .collect()
}
