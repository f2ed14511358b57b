//! Staleness check of stored history.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::{fetcher::last_known_date, store::TableStore};

/// Default age, in days, above which history is stale.
pub const DEFAULT_MAX_AGE_DAYS: i64 = 3;

/// Overall verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Every ticker is fresh.
    Ok,
    /// At least one issue.
    Warning,
}

/// Why a ticker was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Latest observation older than the limit.
    Stale,
    /// Nothing stored.
    NoData,
    /// The store could not be read.
    Unreadable,
}

/// One flagged ticker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthIssue {
    /// Ticker.
    pub ticker: String,
    /// Classification.
    pub kind: IssueKind,
    /// Latest stored date, when known.
    pub last_date: Option<NaiveDate>,
    /// Days between `last_date` and the check date.
    pub age_days: Option<i64>,
    /// Human-readable description.
    pub message: String,
}

/// Result of a staleness check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    /// `ok` or `warning`.
    pub status: HealthStatus,
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
    /// Flagged tickers, in check order.
    pub issues: Vec<HealthIssue>,
}

impl HealthReport {
    /// `true` when nothing was flagged.
    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}

/// Flags every ticker whose latest observation is more than `max_age_days`
/// before `today`. Store failures become issues instead of errors.
pub fn check_staleness(
    store: &dyn TableStore,
    tickers: &[String],
    today: NaiveDate,
    max_age_days: i64,
    checked_at: DateTime<Utc>,
) -> HealthReport {
    let mut issues = Vec::new();
    for ticker in tickers {
        let issue = match last_known_date(store, ticker) {
            Ok(Some(last)) => {
                let age = (today - last).num_days();
                (age > max_age_days).then(|| HealthIssue {
                    ticker: ticker.clone(),
                    kind: IssueKind::Stale,
                    last_date: Some(last),
                    age_days: Some(age),
                    message: format!("last observation {last} is {age} days old"),
                })
            }
            Ok(None) => Some(HealthIssue {
                ticker: ticker.clone(),
                kind: IssueKind::NoData,
                last_date: None,
                age_days: None,
                message: "no observations stored".to_string(),
            }),
            Err(e) => Some(HealthIssue {
                ticker: ticker.clone(),
                kind: IssueKind::Unreadable,
                last_date: None,
                age_days: None,
                message: e.to_string(),
            }),
        };
        if let Some(issue) = issue {
            warn!(ticker = %issue.ticker, kind = ?issue.kind, "{}", issue.message);
            issues.push(issue);
        }
    }

    let status = if issues.is_empty() {
        info!(tickers = tickers.len(), "stored history is fresh");
        HealthStatus::Ok
    } else {
        HealthStatus::Warning
    };
    HealthReport {
        status,
        checked_at,
        issues,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::{models::ObservationRow, store::memory::MemoryStore, writer::UpsertWriter};

    fn seeded(today: NaiveDate) -> MemoryStore {
        let store = MemoryStore::new();
        let writer = UpsertWriter::new(&store, 100);
        writer
            .write_observations(&[
                ObservationRow::new("OLD", today - Duration::days(4), 10.0),
                ObservationRow::new("NEW", today - Duration::days(2), 10.0),
                ObservationRow::new("EDGE", today - Duration::days(3), 10.0),
            ])
            .unwrap();
        store
    }

    #[test]
    fn four_days_is_stale_two_is_not() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 20).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap();
        let store = seeded(today);
        let tickers: Vec<String> = ["OLD", "NEW", "EDGE", "NONE"].map(String::from).to_vec();

        let report = check_staleness(&store, &tickers, today, DEFAULT_MAX_AGE_DAYS, at);
        assert_eq!(report.status, HealthStatus::Warning);
        let flagged: Vec<_> = report.issues.iter().map(|i| (i.ticker.as_str(), i.kind)).collect();
        assert_eq!(flagged, vec![("OLD", IssueKind::Stale), ("NONE", IssueKind::NoData)]);
        assert_eq!(report.issues[0].age_days, Some(4));
    }

    #[test]
    fn fresh_history_is_ok() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 20).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap();
        let store = seeded(today);
        let report = check_staleness(&store, &["NEW".to_string()], today, 3, at);
        assert!(report.is_ok());
        assert!(report.issues.is_empty());
    }
}
