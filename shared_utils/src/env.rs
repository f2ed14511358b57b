use std::str::FromStr;

use crate::config::ConfigError;

/// Reads an environment variable, returning a structured error if it's missing.
///
/// This is a thin wrapper around `std::env::var` that provides a more
/// ergonomic and specific error type for missing variables.
///
/// # Arguments
/// * `name` - The name of the environment variable to read.
pub fn get_env_var(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

/// Reads and parses an optional environment variable.
///
/// Returns `Ok(None)` when the variable is unset or blank.
pub fn parse_env_var<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_with(name, |n| std::env::var(n).ok())
}

/// Same as [`parse_env_var`] but reads through `lookup` instead of the process
/// environment, so callers can feed a fixed map in tests.
pub fn parse_with<T, F>(name: &str, lookup: F) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<T>()
        .map(Some)
        .map_err(|e| ConfigError::InvalidValue {
            name: name.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        })
}

/// Parses a boolean flag the way shell users write them:
/// `true/false`, `1/0`, `yes/no`, `on/off` (case-insensitive).
pub fn parse_flag_with<F>(name: &str, lookup: F) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "true" | "1" | "yes" | "on" => Ok(Some(true)),
        "false" | "0" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value: raw,
            reason: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn missing_var_is_reported_by_name() {
        let err = get_env_var("SHARED_UTILS_SURELY_UNSET_VAR").unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingEnvVar("SHARED_UTILS_SURELY_UNSET_VAR".into())
        );
    }

    #[test]
    fn parse_with_handles_unset_blank_and_values() {
        let env = lookup(&[("WORKERS", " 4 "), ("BLANK", "  ")]);
        assert_eq!(parse_with::<u32, _>("WORKERS", &env).unwrap(), Some(4));
        assert_eq!(parse_with::<u32, _>("BLANK", &env).unwrap(), None);
        assert_eq!(parse_with::<u32, _>("UNSET", &env).unwrap(), None);
    }

    #[test]
    fn parse_with_reports_bad_numbers() {
        let env = lookup(&[("WORKERS", "three")]);
        let err = parse_with::<u32, _>("WORKERS", &env).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref name, .. } if name == "WORKERS"));
    }

    #[test]
    fn flags_accept_common_spellings() {
        let env = lookup(&[("A", "TRUE"), ("B", "off"), ("C", "maybe")]);
        assert_eq!(parse_flag_with("A", &env).unwrap(), Some(true));
        assert_eq!(parse_flag_with("B", &env).unwrap(), Some(false));
        assert!(parse_flag_with("C", &env).is_err());
        assert_eq!(parse_flag_with("D", &env).unwrap(), None);
    }
}
