//! Indicator engine: per-point rolling statistics and window aggregates.
//!
//! Per-point values (daily return, 20-session moving average, ±2σ bands,
//! running peak, drawdown) are computed by [`compute_seeded`], optionally
//! continuing from stored history so incremental batches agree with a full
//! recomputation. The σ is the sample standard deviation (n − 1).
//!
//! Aggregates return `None` ("unavailable") for empty or degenerate input
//! and are rounded to two decimals.

use std::collections::VecDeque;

use chrono::NaiveDate;
use serde::Serialize;

/// Moving-average and band window.
pub const MA_WINDOW: usize = 20;
/// Band width in standard deviations.
pub const BAND_STDDEVS: f64 = 2.0;
/// Sessions per year used to annualize volatility.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;
/// Calendar days per year used to annualize returns.
pub const DAYS_PER_YEAR: f64 = 365.25;
/// Shortest period, in years, an annualized return is computed over.
pub const MIN_YEARS: f64 = 0.01;

/// Derived values for one observation.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointIndicators {
    /// Percent change from the previous close.
    pub daily_return: Option<f64>,
    /// Mean of the trailing [`MA_WINDOW`] closes.
    pub ma20: Option<f64>,
    /// `ma20 + 2σ`.
    pub upper_band: Option<f64>,
    /// `ma20 - 2σ`.
    pub lower_band: Option<f64>,
    /// Highest close seen so far, inclusive.
    pub peak: f64,
    /// `(close / peak - 1) × 100`; never positive.
    pub drawdown: f64,
}

/// Stored state the computation continues from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    /// Trailing stored closes, oldest first. Only the last `MA_WINDOW - 1` matter.
    pub closes: Vec<f64>,
    /// Running peak as of the last stored close.
    pub peak: Option<f64>,
}

/// Indicators for `closes` with no prior history.
pub fn compute(closes: &[f64]) -> Vec<PointIndicators> {
    compute_seeded(&History::default(), closes)
}

/// Indicators for `closes`, continuing after `history`.
pub fn compute_seeded(history: &History, closes: &[f64]) -> Vec<PointIndicators> {
    let keep = history.closes.len().saturating_sub(MA_WINDOW - 1);
    let seed = &history.closes[keep..];

    let mut window: VecDeque<f64> = seed.iter().copied().collect();
    let mut prev = seed.last().copied();
    let mut peak = seed
        .iter()
        .copied()
        .chain(history.peak)
        .fold(None, |acc: Option<f64>, c| Some(acc.map_or(c, |p| p.max(c))));

    let mut out = Vec::with_capacity(closes.len());
    for &close in closes {
        window.push_back(close);
        if window.len() > MA_WINDOW {
            window.pop_front();
        }

        let daily_return = prev.and_then(|p| pct_change(p, close));
        let (ma20, upper_band, lower_band) = match band(&window) {
            Some((mean, sd)) => (
                Some(mean),
                Some(mean + BAND_STDDEVS * sd),
                Some(mean - BAND_STDDEVS * sd),
            ),
            None => (None, None, None),
        };
        let running = peak.map_or(close, |p: f64| p.max(close));
        peak = Some(running);

        out.push(PointIndicators {
            daily_return,
            ma20,
            upper_band,
            lower_band,
            peak: running,
            drawdown: drawdown(close, running),
        });
        prev = Some(close);
    }
    out
}

fn pct_change(from: f64, to: f64) -> Option<f64> {
    (from != 0.0).then(|| (to / from - 1.0) * 100.0)
}

fn drawdown(close: f64, peak: f64) -> f64 {
    if peak <= 0.0 {
        return 0.0;
    }
    ((close / peak - 1.0) * 100.0).min(0.0)
}

fn band(window: &VecDeque<f64>) -> Option<(f64, f64)> {
    if window.len() < MA_WINDOW {
        return None;
    }
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let var = window.iter().map(|c| (c - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some((mean, var.sqrt()))
}

/// Sample standard deviation; `None` below two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(var.sqrt())
}

/// Rounds to two decimals.
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// A dated close.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PricePoint {
    /// Observation date.
    pub date: NaiveDate,
    /// Closing value.
    pub close: f64,
}

/// `(last / first − 1) × 100`.
pub fn cumulative_return(points: &[PricePoint]) -> Option<f64> {
    let (first, last) = (points.first()?, points.last()?);
    pct_change(first.close, last.close).map(round2)
}

/// Compound annual growth over the calendar span of `points`, in percent.
///
/// The span is floored at [`MIN_YEARS`] so a window of a few days does not
/// explode.
pub fn annualized_return(points: &[PricePoint]) -> Option<f64> {
    let (first, last) = (points.first()?, points.last()?);
    if first.close <= 0.0 || last.close <= 0.0 {
        return None;
    }
    let days = (last.date - first.date).num_days() as f64;
    let years = (days / DAYS_PER_YEAR).max(MIN_YEARS);
    let growth = (last.close / first.close).powf(1.0 / years) - 1.0;
    growth.is_finite().then(|| round2(growth * 100.0))
}

/// Daily percent returns between consecutive points.
pub fn daily_returns(points: &[PricePoint]) -> Vec<f64> {
    points
        .windows(2)
        .filter_map(|w| pct_change(w[0].close, w[1].close))
        .collect()
}

/// Sample σ of daily returns × √252, in percent.
pub fn annualized_volatility(points: &[PricePoint]) -> Option<f64> {
    sample_std(&daily_returns(points)).map(|sd| round2(sd * TRADING_DAYS_PER_YEAR.sqrt()))
}

/// Most negative drawdown within the window, measured from the window's own peak.
pub fn max_drawdown(points: &[PricePoint]) -> Option<f64> {
    if points.is_empty() {
        return None;
    }
    let closes: Vec<f64> = points.iter().map(|p| p.close).collect();
    compute(&closes)
        .iter()
        .map(|p| p.drawdown)
        .reduce(f64::min)
        .map(round2)
}

/// `(return − risk_free) / volatility`, unavailable when either input is
/// unavailable or volatility is zero.
pub fn sharpe_ratio(
    annualized_return: Option<f64>,
    volatility: Option<f64>,
    risk_free: f64,
) -> Option<f64> {
    let (ret, vol) = (annualized_return?, volatility?);
    if vol == 0.0 {
        return None;
    }
    Some(round2((ret - risk_free) / vol))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn series(closes: &[f64]) -> Vec<PricePoint> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| PricePoint {
                date: start + chrono::Duration::days(i as i64),
                close,
            })
            .collect()
    }

    #[test]
    fn first_point_has_no_return_and_short_history_has_no_average() {
        let out = compute(&[10.0, 11.0, 9.9]);
        assert_eq!(out[0].daily_return, None);
        assert!((out[1].daily_return.unwrap() - 10.0).abs() < 1e-9);
        assert!(out.iter().all(|p| p.ma20.is_none() && p.upper_band.is_none()));
        assert_eq!(out[2].peak, 11.0);
        assert!((out[2].drawdown + 10.0).abs() < 1e-9);
    }

    #[test]
    fn bands_use_sample_deviation() {
        let closes: Vec<f64> = (1..=20).map(f64::from).collect();
        let last = compute(&closes)[19];
        assert!((last.ma20.unwrap() - 10.5).abs() < 1e-9);
        // sample σ of 1..=20 is sqrt(35)
        let sd = 35f64.sqrt();
        assert!((last.upper_band.unwrap() - (10.5 + 2.0 * sd)).abs() < 1e-9);
        assert!((last.lower_band.unwrap() - (10.5 - 2.0 * sd)).abs() < 1e-9);
    }

    #[test]
    fn seeded_computation_matches_full_history() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0).collect();
        let full = compute(&closes);

        let (stored, fresh) = closes.split_at(45);
        let history = History {
            closes: stored.to_vec(),
            peak: Some(full[44].peak),
        };
        let tail = compute_seeded(&history, fresh);
        for (a, b) in tail.iter().zip(&full[45..]) {
            assert!((a.ma20.unwrap() - b.ma20.unwrap()).abs() < 1e-9);
            assert!((a.daily_return.unwrap() - b.daily_return.unwrap()).abs() < 1e-9);
            assert_eq!(a.peak, b.peak);
        }
    }

    #[test]
    fn ten_percent_rise_is_ten_percent() {
        assert_eq!(cumulative_return(&series(&[100.0, 104.0, 110.0])), Some(10.0));
    }

    #[test]
    fn aggregates_are_unavailable_on_empty_input() {
        assert_eq!(cumulative_return(&[]), None);
        assert_eq!(annualized_return(&[]), None);
        assert_eq!(annualized_volatility(&[]), None);
        assert_eq!(max_drawdown(&[]), None);
        assert_eq!(annualized_volatility(&series(&[1.0, 2.0])), None);
    }

    #[test]
    fn annualized_return_over_one_year() {
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let pts = [
            PricePoint { date: start, close: 100.0 },
            PricePoint {
                date: start + chrono::Duration::days(365),
                close: 112.0,
            },
        ];
        // 365 / 365.25 years: slightly above 12%
        assert_eq!(annualized_return(&pts), Some(12.01));
    }

    #[test]
    fn short_windows_are_floored() {
        let pts = series(&[100.0, 100.01]);
        let r = annualized_return(&pts).unwrap();
        // one day would annualize to ~3.7%; the 0.01y floor gives ~1%
        assert!((r - 1.0).abs() < 0.05, "{r}");
    }

    #[test]
    fn sharpe_unavailable_cases() {
        let flat = series(&[50.0; 30]);
        let vol = annualized_volatility(&flat);
        assert_eq!(vol, Some(0.0));
        assert_eq!(sharpe_ratio(annualized_return(&flat), vol, 0.0), None);
        assert_eq!(sharpe_ratio(None, Some(10.0), 0.0), None);
        assert_eq!(sharpe_ratio(Some(10.0), None, 0.0), None);
        assert_eq!(sharpe_ratio(Some(12.0), Some(8.0), 4.0), Some(1.0));
    }

    #[test]
    fn max_drawdown_is_the_deepest_dip() {
        assert_eq!(max_drawdown(&series(&[100.0, 120.0, 90.0, 130.0, 117.0])), Some(-25.0));
    }

    proptest! {
        #[test]
        fn moving_average_is_trailing_mean(closes in prop::collection::vec(1.0f64..1000.0, 20..80)) {
            let out = compute(&closes);
            for (i, p) in out.iter().enumerate() {
                if i < MA_WINDOW - 1 {
                    prop_assert!(p.ma20.is_none());
                } else {
                    let mean = closes[i + 1 - MA_WINDOW..=i].iter().sum::<f64>() / MA_WINDOW as f64;
                    prop_assert!((p.ma20.unwrap() - mean).abs() < 1e-6 * mean.max(1.0));
                }
            }
        }

        #[test]
        fn drawdown_is_never_positive_and_zero_at_peak(closes in prop::collection::vec(0.01f64..1000.0, 1..80)) {
            let out = compute(&closes);
            for (i, p) in out.iter().enumerate() {
                prop_assert!(p.drawdown <= 0.0);
                if closes[i] == p.peak {
                    prop_assert_eq!(p.drawdown, 0.0);
                }
            }
        }
    }
}
