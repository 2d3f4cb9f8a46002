//! Timestamp parsing for `--now`.

use chrono::{DateTime, NaiveDateTime, Utc};

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

/// Parse RFC 3339, or a naive date-time taken as UTC.
pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>, String> {
    let input = input.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Ok(ts.with_timezone(&Utc));
    }

    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(input, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            format!(
                "invalid timestamp '{}': expected RFC 3339 or YYYY-MM-DD HH:MM[:SS]",
                input
            )
        })
}
