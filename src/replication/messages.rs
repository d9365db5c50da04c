//! Raw change events as produced by the upstream streaming client
//!
//! A raw event is one INSERT/UPDATE/DELETE row event decoded from the
//! transaction log. It may touch several rows and lives only for one
//! iteration of the supervisor loop.

use super::position::LogPosition;
use crate::utils::timestamp::{format_date, format_naive_datetime, format_time_delta};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Column name to value mapping for one row image
pub type RowImage = BTreeMap<String, ColumnValue>;

/// Typed scalar carried by a row image
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Time(TimeDelta),
    Json(serde_json::Value),
}

impl ColumnValue {
    /// Dates, datetimes and times
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            ColumnValue::Date(_)
                | ColumnValue::DateTime(_)
                | ColumnValue::Time(_)
        )
    }

    /// ISO-8601 rendering for temporal values, `None` for everything else
    pub fn to_iso8601(&self) -> Option<String> {
        match self {
            ColumnValue::Date(value) => Some(format_date(value)),
            ColumnValue::DateTime(value) => Some(format_naive_datetime(value)),
            ColumnValue::Time(value) => Some(format_time_delta(value)),
            _ => None,
        }
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        ColumnValue::Text(value.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        ColumnValue::Text(value)
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        ColumnValue::Int(value)
    }
}

impl Serialize for ColumnValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ColumnValue::Null => serializer.serialize_unit(),
            ColumnValue::Int(value) => serializer.serialize_i64(*value),
            ColumnValue::UInt(value) => serializer.serialize_u64(*value),
            ColumnValue::Float(value) => serializer.serialize_f64(*value),
            ColumnValue::Text(value) => serializer.serialize_str(value),
            ColumnValue::Bytes(value) => serializer.serialize_str(&String::from_utf8_lossy(value)),
            ColumnValue::Json(value) => value.serialize(serializer),
            temporal => match temporal.to_iso8601() {
                Some(text) => serializer.serialize_str(&text),
                None => serializer.serialize_unit(),
            },
        }
    }
}

/// Operation kind of a raw event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Insert => write!(f, "INSERT"),
            EventKind::Update => write!(f, "UPDATE"),
            EventKind::Delete => write!(f, "DELETE"),
        }
    }
}

/// Positionally aligned before/after images of one updated row
#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    pub before: RowImage,
    pub after: RowImage,
}

/// Row payloads of a raw event, tagged by operation
#[derive(Debug, Clone, PartialEq)]
pub enum RowChange {
    Insert(Vec<RowImage>),
    Update(Vec<RowUpdate>),
    Delete(Vec<RowImage>),
}

impl RowChange {
    pub fn kind(&self) -> EventKind {
        match self {
            RowChange::Insert(_) => EventKind::Insert,
            RowChange::Update(_) => EventKind::Update,
            RowChange::Delete(_) => EventKind::Delete,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RowChange::Insert(rows) | RowChange::Delete(rows) => rows.len(),
            RowChange::Update(pairs) => pairs.len(),
        }
    }
}

/// One decoded row event
#[derive(Debug, Clone, PartialEq)]
pub struct RawChangeEvent {
    /// Database (schema) the table lives in
    pub schema: String,
    pub table: String,
    /// Declared primary key columns of the table, in key order
    pub key_columns: Vec<String>,
    pub rows: RowChange,
    /// Start of the transaction containing this event, the coordinate a
    /// restart resumes from
    pub position: LogPosition,
    /// When the relay received the event
    pub received_at: DateTime<Utc>,
}

impl RawChangeEvent {
    pub fn kind(&self) -> EventKind {
        self.rows.kind()
    }
}
