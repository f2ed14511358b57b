//! Time zone parsing and conversion helpers.
//!
//! What this module provides:
//! - [`parse_tz`]: parse an IANA zone name (e.g. "America/Sao_Paulo") with a readable error.
//! - [`to_rfc3339_millis`]: the timestamp format written to the store.
//!
//! All stored timestamps are RFC-3339 UTC strings; local times only exist at the
//! configuration edge.

use anyhow::Context;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Parses an IANA time zone name.
pub fn parse_tz(name: &str) -> anyhow::Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("bad tz: {name}"))
}

/// Format a UTC datetime as an RFC-3339 string with millisecond precision.
pub fn to_rfc3339_millis(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
