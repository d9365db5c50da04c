//! Event normalizer
//!
//! Expands one raw row event into one [`ChangeRecord`] per affected row.
//! Pure: no I/O, no clock reads, never fails.

use super::record::ChangeRecord;
use crate::replication::messages::{ColumnValue, RawChangeEvent, RowChange, RowImage};

/// Expand a raw event into canonical records, preserving row order
pub fn normalize(raw: &RawChangeEvent) -> Vec<ChangeRecord> {
    let schema = raw.schema.as_str();
    let table = raw.table.as_str();
    let timestamp = raw.received_at;

    match &raw.rows {
        RowChange::Insert(rows) => rows
            .iter()
            .map(|row| {
                let after = coerce_row(row);
                let key = primary_key(&raw.key_columns, &after);
                ChangeRecord::insert(schema, table, key, after, timestamp)
            })
            .collect(),
        RowChange::Update(pairs) => pairs
            .iter()
            .map(|pair| {
                let before = coerce_row(&pair.before);
                let after = coerce_row(&pair.after);
                // The before image identifies the row even when the key itself changed
                let key = primary_key(&raw.key_columns, &before);
                ChangeRecord::update(schema, table, key, before, after, timestamp)
            })
            .collect(),
        RowChange::Delete(rows) => rows
            .iter()
            .map(|row| {
                let before = coerce_row(row);
                let key = primary_key(&raw.key_columns, &before);
                ChangeRecord::delete(schema, table, key, before, timestamp)
            })
            .collect(),
    }
}

/// Apply [`coerce_value`] to every column of a row image
pub fn coerce_row(row: &RowImage) -> RowImage {
    row.iter()
        .map(|(column, value)| (column.clone(), coerce_value(value)))
        .collect()
}

/// Render temporal values as ISO-8601 text and decode bytes as lossy UTF-8.
/// Everything else, including text, passes through unchanged.
pub fn coerce_value(value: &ColumnValue) -> ColumnValue {
    match value {
        ColumnValue::Bytes(bytes) => ColumnValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        temporal if temporal.is_temporal() => match temporal.to_iso8601() {
            Some(text) => ColumnValue::Text(text),
            None => temporal.clone(),
        },
        other => other.clone(),
    }
}

/// Key column values taken from `image`. Tables without a declared key are
/// identified by the whole image.
fn primary_key(key_columns: &[String], image: &RowImage) -> RowImage {
    if key_columns.is_empty() {
        return image.clone();
    }

    key_columns
        .iter()
        .map(|column| {
            let value = image.get(column).cloned().unwrap_or(ColumnValue::Null);
            (column.clone(), value)
        })
        .collect()
}
