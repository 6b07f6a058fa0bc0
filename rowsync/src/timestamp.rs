//! Timestamp coercion used on both the write path and the read path.
//!
//! Producers report times in whatever unit they have at hand, so a bare
//! number is ambiguous. The rule: interpret it as epoch milliseconds, and
//! keep that interpretation only if it lands in the years 2000 through 2999.
//! Otherwise the number is whole (or fractional) seconds.
//!
//! ```rust
//! use rowsync::timestamp::millis_smart;
//!
//! assert_eq!(millis_smart(1_535_651_091), 1_535_651_091_000);
//! assert_eq!(millis_smart(1_535_651_091_000), 1_535_651_091_000);
//! ```

use chrono::{DateTime, Datelike, NaiveDateTime, NaiveTime, TimeDelta, Utc};

use crate::error::RecordError;
use crate::value::Value;

/// First year (inclusive) in which a bare number is taken as milliseconds.
const MILLIS_YEAR_MIN: i32 = 2000;

/// Last year (exclusive) in which a bare number is taken as milliseconds.
const MILLIS_YEAR_MAX: i32 = 3000;

/// Storage format for DATETIME values in text-backed stores.
pub const STORE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Naive formats accepted by [`parse_iso_date_time`], tried in order.
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
];

fn in_millis_range(millis: i64) -> bool {
    DateTime::from_timestamp_millis(millis)
        .is_some_and(|dt| (MILLIS_YEAR_MIN..MILLIS_YEAR_MAX).contains(&dt.year()))
}

/// Resolves an integer of unknown unit to epoch milliseconds.
pub fn millis_smart(value: i64) -> i64 {
    if in_millis_range(value) {
        value
    } else {
        value.saturating_mul(1000)
    }
}

/// Resolves a float of unknown unit to epoch milliseconds.
#[allow(clippy::cast_possible_truncation)] // saturating float-to-int casts are the intent
pub fn millis_smart_f64(value: f64) -> i64 {
    if in_millis_range(value as i64) {
        value as i64
    } else {
        (value * 1000.0) as i64
    }
}

/// Parses a string timestamp. Numeric strings go through the
/// seconds/milliseconds rule, anything else is parsed as ISO 8601.
pub fn parse_date_time_smart(text: &str) -> Option<DateTime<Utc>> {
    let trimmed = text.trim();
    if let Ok(number) = trimmed.parse::<i64>() {
        return DateTime::from_timestamp_millis(millis_smart(number));
    }
    if let Ok(number) = trimmed.parse::<f64>()
        && number.is_finite()
    {
        return DateTime::from_timestamp_millis(millis_smart_f64(number));
    }
    parse_iso_date_time(trimmed)
}

/// Parses an ISO 8601 date-time, with or without offset. Values without an
/// offset are taken as UTC.
pub fn parse_iso_date_time(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS.iter().find_map(|format| {
        NaiveDateTime::parse_from_str(text, format)
            .ok()
            .map(|naive| naive.and_utc())
    })
}

/// Coerces a field value into a timestamp.
///
/// # Errors
///
/// Returns [`RecordError::InvalidTimestamp`] for booleans, bytes, null,
/// unparseable strings, and numbers outside the representable range.
pub fn to_date_time(field: &str, value: &Value) -> Result<DateTime<Utc>, RecordError> {
    let resolved = match value {
        Value::Timestamp(ts) => Some(*ts),
        Value::Int(v) => DateTime::from_timestamp_millis(millis_smart(i64::from(*v))),
        Value::BigInt(v) => DateTime::from_timestamp_millis(millis_smart(*v)),
        Value::Float(v) => DateTime::from_timestamp_millis(millis_smart_f64(f64::from(*v))),
        Value::Double(v) => DateTime::from_timestamp_millis(millis_smart_f64(*v)),
        Value::Text(s) => parse_date_time_smart(s),
        Value::Null | Value::Bool(_) | Value::Bytes(_) => None,
    };
    resolved.ok_or_else(|| RecordError::InvalidTimestamp {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// Truncates a timestamp to midnight UTC of the same day.
pub fn truncate_to_day(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Adds a (possibly negative) number of days. Returns `None` if the result
/// falls outside the representable date range.
pub fn add_days(ts: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    TimeDelta::try_days(days).and_then(|delta| ts.checked_add_signed(delta))
}

/// UTC day of month, 1 through 31.
pub fn day_of_month(ts: DateTime<Utc>) -> u32 {
    ts.day()
}

/// Formats a timestamp as `yyyy-MM-ddTHH:mm:ssZ`.
pub fn format_iso_without_millis(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}
