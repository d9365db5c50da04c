//! Canonical change records
//!
//! The single output unit of the relay. A record describes exactly one row
//! change and serializes to the wire shape consumers read:
//!
//! ```json
//! {"operation": "UPDATE", "database": "...", "table": "...",
//!  "primary_key": {...}, "data_before": {...}, "data_after": {...},
//!  "timestamp": "..."}
//! ```
//!
//! INSERT and DELETE carry a single `data` image instead of the before/after pair.

use crate::replication::messages::{EventKind, RowImage};
use crate::utils::timestamp::format_instant;
use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl From<EventKind> for Operation {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Insert => Operation::Insert,
            EventKind::Update => Operation::Update,
            EventKind::Delete => Operation::Delete,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Insert => write!(f, "INSERT"),
            Operation::Update => write!(f, "UPDATE"),
            Operation::Delete => write!(f, "DELETE"),
        }
    }
}

/// One normalized row change.
///
/// Fields are private so the before/after presence rules hold for every
/// record: INSERT has only an after image, DELETE only a before image and
/// UPDATE both.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    operation: Operation,
    database: String,
    table: String,
    primary_key: RowImage,
    before: Option<RowImage>,
    after: Option<RowImage>,
    timestamp: DateTime<Utc>,
}

impl ChangeRecord {
    pub fn insert(
        database: impl Into<String>,
        table: impl Into<String>,
        primary_key: RowImage,
        after: RowImage,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            operation: Operation::Insert,
            database: database.into(),
            table: table.into(),
            primary_key,
            before: None,
            after: Some(after),
            timestamp,
        }
    }

    pub fn update(
        database: impl Into<String>,
        table: impl Into<String>,
        primary_key: RowImage,
        before: RowImage,
        after: RowImage,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            operation: Operation::Update,
            database: database.into(),
            table: table.into(),
            primary_key,
            before: Some(before),
            after: Some(after),
            timestamp,
        }
    }

    pub fn delete(
        database: impl Into<String>,
        table: impl Into<String>,
        primary_key: RowImage,
        before: RowImage,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            operation: Operation::Delete,
            database: database.into(),
            table: table.into(),
            primary_key,
            before: Some(before),
            after: None,
            timestamp,
        }
    }

    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    #[cfg(test)]
    pub fn primary_key(&self) -> &RowImage {
        &self.primary_key
    }

    #[cfg(test)]
    pub fn before(&self) -> Option<&RowImage> {
        self.before.as_ref()
    }

    #[cfg(test)]
    pub fn after(&self) -> Option<&RowImage> {
        self.after.as_ref()
    }

    /// Compact JSON bytes, as published to the bus
    pub fn to_json_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Indented JSON text, as printed on the console
    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Serialize for ChangeRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(6))?;
        map.serialize_entry("operation", &self.operation)?;
        map.serialize_entry("database", &self.database)?;
        map.serialize_entry("table", &self.table)?;
        map.serialize_entry("primary_key", &self.primary_key)?;
        match (&self.before, &self.after) {
            (Some(before), Some(after)) => {
                map.serialize_entry("data_before", before)?;
                map.serialize_entry("data_after", after)?;
            }
            (Some(image), None) | (None, Some(image)) => {
                map.serialize_entry("data", image)?;
            }
            (None, None) => {}
        }
        map.serialize_entry("timestamp", &format_instant(&self.timestamp))?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::messages::ColumnValue;
    use chrono::TimeZone;
    use serde_json::json;

    fn image(pairs: &[(&str, ColumnValue)]) -> RowImage {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()
    }

    #[test]
    fn test_update_serializes_before_and_after() {
        let record = ChangeRecord::update(
            "shop",
            "orders",
            image(&[("id", ColumnValue::Int(7))]),
            image(&[("id", ColumnValue::Int(7)), ("state", "new".into())]),
            image(&[("id", ColumnValue::Int(7)), ("state", "paid".into())]),
            at(),
        );

        assert_eq!(
            serde_json::to_value(&record).unwrap(),
            json!({
                "operation": "UPDATE",
                "database": "shop",
                "table": "orders",
                "primary_key": {"id": 7},
                "data_before": {"id": 7, "state": "new"},
                "data_after": {"id": 7, "state": "paid"},
                "timestamp": "2024-05-06T07:08:09.000000Z"
            })
        );
    }

    #[test]
    fn test_delete_uses_data_field() {
        let record = ChangeRecord::delete(
            "shop",
            "orders",
            image(&[("id", ColumnValue::Int(7))]),
            image(&[("id", ColumnValue::Int(7))]),
            at(),
        );

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["operation"], "DELETE");
        assert_eq!(value["data"], json!({"id": 7}));
        assert!(value.get("data_before").is_none());
        assert!(record.after().is_none());
    }

    #[test]
    fn test_field_order_is_stable() {
        let record = ChangeRecord::insert(
            "shop",
            "orders",
            RowImage::new(),
            RowImage::new(),
            at(),
        );
        let text = String::from_utf8(record.to_json_bytes().unwrap()).unwrap();

        assert!(text.starts_with(r#"{"operation":"INSERT","database":"shop","table":"orders""#));
        assert!(text.ends_with(r#""timestamp":"2024-05-06T07:08:09.000000Z"}"#));
    }
}
