//! Timestamp rendering utilities
//!
//! Every temporal value leaving the relay is ISO-8601 text. These helpers keep
//! the exact formats in one place.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeDelta, Timelike, Utc};

/// Render an instant as RFC 3339 / ISO-8601 with microsecond precision and a `Z` suffix.
pub fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Render a zone-less datetime, e.g. `2024-03-01T12:30:00` or `2024-03-01T12:30:00.250000`.
pub fn format_naive_datetime(value: &NaiveDateTime) -> String {
    if value.nanosecond() == 0 {
        value.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        value.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}

/// Render a calendar date, e.g. `2024-03-01`.
pub fn format_date(value: &NaiveDate) -> String {
    value.format("%Y-%m-%d").to_string()
}

/// Render a time-of-day or elapsed-time value as `[-]HH:MM:SS[.ffffff]`.
///
/// Hours are not wrapped at 24, matching the range of SQL `TIME` columns.
pub fn format_time_delta(value: &TimeDelta) -> String {
    let negative = *value < TimeDelta::zero();
    let magnitude = value.abs();

    let total_seconds = magnitude.num_seconds();
    let micros = magnitude.subsec_nanos() / 1_000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    let sign = if negative { "-" } else { "" };
    if micros == 0 {
        format!("{}{:02}:{:02}:{:02}", sign, hours, minutes, seconds)
    } else {
        format!("{}{:02}:{:02}:{:02}.{:06}", sign, hours, minutes, seconds, micros)
    }
}
