use chrono::NaiveDate;

use crate::{
    models::request_params::BarsRequestParams,
    providers::{ProviderError, ValidationSnafu},
};

/// Rejects ranges the chart API cannot answer.
pub fn validate_range(params: &BarsRequestParams) -> Result<(), ProviderError> {
    if params.symbol.trim().is_empty() {
        return ValidationSnafu {
            message: "symbol must not be empty",
        }
        .fail();
    }
    if params.start > params.end {
        return ValidationSnafu {
            message: format!("start {} is after end {}", params.start, params.end),
        }
        .fail();
    }
    Ok(())
}

/// Query parameters for a daily chart request.
///
/// `period2` is the last second of `end` so the end date is inclusive.
pub fn construct_params(start: NaiveDate, end: NaiveDate) -> Vec<(String, String)> {
    let period1 = start.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
    let period2 = end
        .and_hms_opt(23, 59, 59)
        .map(|t| t.and_utc().timestamp())
        .unwrap_or(period1);
    vec![
        ("period1".to_string(), period1.to_string()),
        ("period2".to_string(), period2.to_string()),
        ("interval".to_string(), "1d".to_string()),
        ("events".to_string(), "history".to_string()),
    ]
}
