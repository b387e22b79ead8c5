// ⏰ Temporal Parsing - create_dte timestamps
// Every property value carries the moment it was recorded.
// The latest recorded value is the authoritative one, so timestamps must parse
// the same way no matter which loader produced them.

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer};

// ============================================================================
// ACCEPTED FORMATS
// ============================================================================

/// Wall-clock formats accepted for `create_dte` (no time zone)
///
/// `%.f` also matches a missing fractional part.
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse a `create_dte` value into a timezone-less timestamp
///
/// Supported inputs:
/// - `2024-03-01 12:30:00` / `2024-03-01 12:30:00.250`
/// - `2024-03-01T12:30:00`
/// - `2024-03-01T12:30:00+02:00` (offset is ignored, wall time kept)
/// - `2024-03-01` (midnight)
pub fn parse_timestamp(text: &str) -> Result<NaiveDateTime> {
    let text = text.trim();

    for format in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(ts);
        }
    }

    // A TIMESTAMP column drops any zone indication and keeps the wall time
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.naive_local());
    }

    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(ts) = date.and_hms_opt(0, 0, 0) {
            return Ok(ts);
        }
    }

    Err(anyhow!("Unrecognized timestamp: {:?}", text))
}

/// Serde adapter for CSV columns holding a `create_dte`
pub fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    parse_timestamp(&text).map_err(serde::de::Error::custom)
}

// ============================================================================
// TESTS
// ============================================================================
