//! MySQL binlog streaming client
//!
//! Connects as a replica with a fixed server id, verifies binary logging is
//! enabled, resolves the live coordinate when no saved position exists and
//! decodes write/update/delete rows events into [`RawChangeEvent`]s.
//!
//! Coordinates handed out are always transaction boundaries. A dump started
//! between a TABLE_MAP and its rows events cannot decode those rows, so each
//! event carries the start of its enclosing transaction and a resume replays
//! that transaction from the beginning.

use super::messages::{ColumnValue, RawChangeEvent, RowChange, RowImage, RowUpdate};
use super::position::{LogPosition, StartPosition};
use super::supervisor::{ChangeStream, ChangeStreamConnector};
use crate::core::config::DatabaseParams;
use crate::core::{RelayError, RelayResult};
use async_trait::async_trait;
use chrono::{NaiveDate, TimeDelta, Utc};
use futures::StreamExt;
use mysql_async::binlog::events::{EventData, RowsEventData};
use mysql_async::binlog::jsonb;
use mysql_async::binlog::row::BinlogRow;
use mysql_async::binlog::value::BinlogValue;
use mysql_async::consts::ColumnType;
use mysql_async::prelude::Queryable;
use mysql_async::{BinlogStream, BinlogStreamRequest, Conn, Opts, OptsBuilder, Row, Value};
use serde_json::json;
use std::collections::HashMap;
use tracing::{debug, info, warn};

const COLUMNS_QUERY: &str = "SELECT COLUMN_NAME, COLUMN_KEY FROM information_schema.COLUMNS \
     WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? ORDER BY ORDINAL_POSITION";

/// Column names and declared primary key of one table
#[derive(Debug, Clone, Default)]
struct TableColumns {
    names: Vec<String>,
    key_columns: Vec<String>,
}

impl TableColumns {
    fn name(&self, index: usize) -> String {
        self.names
            .get(index)
            .cloned()
            .unwrap_or_else(|| format!("UNKNOWN_COL{}", index))
    }
}

/// Rows of one rows event, decoded but not yet named
struct DecodedRows {
    schema: String,
    table: String,
    kind: RowsKind,
    rows: Vec<(Option<Vec<Option<ColumnValue>>>, Option<Vec<Option<ColumnValue>>>)>,
}

#[derive(Clone, Copy)]
enum RowsKind {
    Write,
    Update,
    Delete,
}

/// How a binlog event moves the resume coordinate
#[derive(Debug, Clone, PartialEq)]
enum Boundary {
    /// Switch to another log file; the header offset refers to the old file
    Rotate(LogPosition),
    Begin,
    /// XID event, or a COMMIT/ROLLBACK query
    Commit,
    /// Any other query. Outside a transaction this is implicitly committed DDL.
    Statement,
    Other,
}

fn classify_query(sql: &str) -> Boundary {
    let sql = sql.trim();
    if sql.eq_ignore_ascii_case("BEGIN") {
        Boundary::Begin
    } else if sql.eq_ignore_ascii_case("COMMIT") || sql.eq_ignore_ascii_case("ROLLBACK") {
        Boundary::Commit
    } else {
        Boundary::Statement
    }
}

fn boundary_of(data: &EventData<'_>) -> Boundary {
    match data {
        EventData::RotateEvent(rotate) => Boundary::Rotate(LogPosition::new(
            rotate.name().into_owned(),
            rotate.position(),
        )),
        EventData::XidEvent(_) => Boundary::Commit,
        EventData::QueryEvent(query) => classify_query(&query.query()),
        _ => Boundary::Other,
    }
}

/// Read offset of a binlog session and the last transaction boundary behind it
#[derive(Debug)]
struct BinlogCursor {
    current: LogPosition,
    committed: LogPosition,
    in_transaction: bool,
}

impl BinlogCursor {
    /// `start` must itself be a transaction boundary
    fn new(start: LogPosition) -> Self {
        Self {
            current: start.clone(),
            committed: start,
            in_transaction: false,
        }
    }

    /// Safe resume point: the start of the transaction being read, if any
    fn committed(&self) -> &LogPosition {
        &self.committed
    }

    /// Move past one event whose header reports `end_offset`
    fn advance(&mut self, boundary: Boundary, end_offset: u64) {
        if let Boundary::Rotate(target) = boundary {
            debug!("Binlog rotated to {}", target);
            self.current = target.clone();
            self.committed = target;
            self.in_transaction = false;
            return;
        }

        // Artificial events carry a zero end offset
        if end_offset > 0 {
            self.current.offset = end_offset;
        }

        match boundary {
            Boundary::Begin => self.in_transaction = true,
            Boundary::Commit => {
                self.in_transaction = false;
                self.committed = self.current.clone();
            }
            Boundary::Statement if !self.in_transaction => {
                self.committed = self.current.clone();
            }
            _ => {}
        }
    }
}

fn stream_error(message: &str) -> impl FnOnce(mysql_async::Error) -> RelayError + '_ {
    move |e| RelayError::stream_with_source(message, e)
}

pub struct MysqlBinlogConnector {
    params: DatabaseParams,
    server_id: u32,
}

impl MysqlBinlogConnector {
    pub fn new(params: DatabaseParams, server_id: u32) -> Self {
        Self { params, server_id }
    }

    fn opts(&self) -> Opts {
        OptsBuilder::default()
            .ip_or_hostname(self.params.host.clone())
            .tcp_port(self.params.port)
            .user(Some(self.params.user.clone()))
            .pass(Some(self.params.password.clone()))
            .db_name(Some(self.params.database.clone()))
            .into()
    }

    async fn check_binlog_enabled(conn: &mut Conn) -> RelayResult<()> {
        let log_bin: Option<(String, String)> = conn
            .query_first("SHOW VARIABLES LIKE 'log_bin'")
            .await
            .map_err(stream_error("Failed to read log_bin"))?;

        match log_bin {
            Some((_, value)) if !value.eq_ignore_ascii_case("ON") => Err(RelayError::config(
                "Binary logging not enabled on MySQL server",
            )),
            _ => Ok(()),
        }
    }

    async fn live_position(conn: &mut Conn) -> RelayResult<LogPosition> {
        let status: Option<Row> = match conn.query_first("SHOW MASTER STATUS").await {
            Ok(row) => row,
            // MySQL 8.4 renamed the statement
            Err(_) => conn
                .query_first("SHOW BINARY LOG STATUS")
                .await
                .map_err(stream_error("Failed to read binary log status"))?,
        };

        let row = status.ok_or_else(|| {
            RelayError::config("Could not get the current binlog position from the server")
        })?;
        let file: Option<String> = row.get(0);
        let offset: Option<u64> = row.get(1);

        match (file, offset) {
            (Some(file), Some(offset)) => Ok(LogPosition::new(file, offset)),
            _ => Err(RelayError::stream("Malformed binary log status row")),
        }
    }
}

#[async_trait]
impl ChangeStreamConnector for MysqlBinlogConnector {
    async fn connect(&self, start: &StartPosition) -> RelayResult<Box<dyn ChangeStream>> {
        info!(
            "Connecting to MySQL {}:{} as server id {}",
            self.params.host, self.params.port, self.server_id
        );
        let mut metadata = Conn::new(self.opts())
            .await
            .map_err(stream_error("Failed to connect to MySQL"))?;

        Self::check_binlog_enabled(&mut metadata).await?;

        let position = match start {
            StartPosition::At(position) => position.clone(),
            StartPosition::Live => {
                let live = Self::live_position(&mut metadata).await?;
                info!("Resolved live binlog position {}", live);
                live
            }
        };

        let binlog_conn = Conn::new(self.opts())
            .await
            .map_err(stream_error("Failed to open binlog connection"))?;
        let request = BinlogStreamRequest::new(self.server_id)
            .with_filename(position.file.as_bytes())
            .with_pos(position.offset);
        let stream = binlog_conn
            .get_binlog_stream(request)
            .await
            .map_err(stream_error("Failed to start binlog stream"))?;

        Ok(Box::new(MysqlChangeStream {
            stream,
            metadata,
            tables: HashMap::new(),
            cursor: BinlogCursor::new(position),
        }))
    }
}

/// Binlog session plus a regular connection for table metadata lookups
struct MysqlChangeStream {
    stream: BinlogStream,
    metadata: Conn,
    tables: HashMap<(String, String), TableColumns>,
    cursor: BinlogCursor,
}

impl MysqlChangeStream {
    async fn table_columns(&mut self, schema: &str, table: &str) -> RelayResult<TableColumns> {
        let key = (schema.to_string(), table.to_string());
        if let Some(columns) = self.tables.get(&key) {
            return Ok(columns.clone());
        }

        let rows: Vec<(String, String)> = self
            .metadata
            .exec(COLUMNS_QUERY, (schema.to_string(), table.to_string()))
            .await
            .map_err(stream_error("Failed to load table columns"))?;

        if rows.is_empty() {
            warn!("No column metadata for {}.{}", schema, table);
        }

        let columns = TableColumns {
            key_columns: rows
                .iter()
                .filter(|(_, key)| key == "PRI")
                .map(|(name, _)| name.clone())
                .collect(),
            names: rows.into_iter().map(|(name, _)| name).collect(),
        };
        debug!(
            "Cached {} columns for {}.{} (key: {:?})",
            columns.names.len(),
            schema,
            table,
            columns.key_columns
        );
        self.tables.insert(key, columns.clone());
        Ok(columns)
    }

    fn decode_rows(&self, rows_event: &RowsEventData<'_>) -> RelayResult<Option<DecodedRows>> {
        let kind = match rows_event {
            RowsEventData::WriteRowsEventV1(_) | RowsEventData::WriteRowsEvent(_) => RowsKind::Write,
            RowsEventData::UpdateRowsEventV1(_)
            | RowsEventData::UpdateRowsEvent(_)
            | RowsEventData::PartialUpdateRowsEvent(_) => RowsKind::Update,
            RowsEventData::DeleteRowsEventV1(_) | RowsEventData::DeleteRowsEvent(_) => {
                RowsKind::Delete
            }
            #[allow(unreachable_patterns)]
            _ => return Ok(None),
        };

        let table_id = rows_event.table_id();
        let tme = self.stream.get_tme(table_id).ok_or_else(|| {
            RelayError::stream(format!("Rows event for unknown table id {}", table_id))
        })?;

        let mut rows = Vec::new();
        for row in rows_event.rows(tme) {
            let (before, after) = row.map_err(|e| {
                RelayError::stream_with_source("Failed to decode binlog row", e)
            })?;
            rows.push((before.map(row_values), after.map(row_values)));
        }

        Ok(Some(DecodedRows {
            schema: tme.database_name().into_owned(),
            table: tme.table_name().into_owned(),
            kind,
            rows,
        }))
    }
}

#[async_trait]
impl ChangeStream for MysqlChangeStream {
    fn position(&self) -> &LogPosition {
        self.cursor.committed()
    }

    async fn next_event(&mut self) -> RelayResult<Option<RawChangeEvent>> {
        loop {
            let event = match self.stream.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(RelayError::stream_with_source("Binlog stream failed", e)),
                Some(Ok(event)) => event,
            };
            let end_offset = u64::from(event.header().log_pos());

            let (boundary, decoded) = {
                let data = event.read_data().map_err(|e| {
                    RelayError::stream_with_source("Failed to decode binlog event", e)
                })?;
                match data {
                    Some(EventData::RowsEvent(rows_event)) => {
                        (Boundary::Other, self.decode_rows(&rows_event)?)
                    }
                    Some(data) => (boundary_of(&data), None),
                    None => (Boundary::Other, None),
                }
            };
            self.cursor.advance(boundary, end_offset);

            let Some(decoded) = decoded else {
                continue;
            };

            let columns = self.table_columns(&decoded.schema, &decoded.table).await?;
            let transaction_start = self.cursor.committed().clone();
            return Ok(Some(build_event(decoded, &columns, transaction_start)));
        }
    }

    async fn close(self: Box<Self>) -> RelayResult<()> {
        let this = *self;
        let stream_result = this.stream.close().await;
        let metadata_result = this.metadata.disconnect().await;

        stream_result.map_err(stream_error("Failed to close binlog stream"))?;
        metadata_result.map_err(stream_error("Failed to close metadata connection"))?;
        Ok(())
    }
}

fn build_event(decoded: DecodedRows, columns: &TableColumns, position: LogPosition) -> RawChangeEvent {
    let image = |values: Option<Vec<Option<ColumnValue>>>| -> RowImage {
        values
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| value.map(|value| (columns.name(index), value)))
            .collect()
    };

    let rows = match decoded.kind {
        RowsKind::Write => RowChange::Insert(
            decoded
                .rows
                .into_iter()
                .map(|(_, after)| image(after))
                .collect(),
        ),
        RowsKind::Update => RowChange::Update(
            decoded
                .rows
                .into_iter()
                .map(|(before, after)| RowUpdate {
                    before: image(before),
                    after: image(after),
                })
                .collect(),
        ),
        RowsKind::Delete => RowChange::Delete(
            decoded
                .rows
                .into_iter()
                .map(|(before, _)| image(before))
                .collect(),
        ),
    };

    RawChangeEvent {
        schema: decoded.schema,
        table: decoded.table,
        key_columns: columns.key_columns.clone(),
        rows,
        position,
        received_at: Utc::now(),
    }
}

/// Values of one row image; `None` marks a column absent from a partial image
fn row_values(row: BinlogRow) -> Vec<Option<ColumnValue>> {
    (0..row.len())
        .map(|index| {
            let column_type = row.columns_ref().get(index).map(|c| c.column_type());
            row.as_ref(index)
                .map(|value| convert_value(value, column_type))
        })
        .collect()
}

fn convert_value(value: &BinlogValue<'_>, column_type: Option<ColumnType>) -> ColumnValue {
    match value {
        BinlogValue::Value(value) => convert_sql_value(value, column_type),
        BinlogValue::Jsonb(document) => match json_value(document) {
            Some(json) => ColumnValue::Json(json),
            None => ColumnValue::Text(format!("{:?}", document)),
        },
        // Partial JSON updates: one entry per modified path
        BinlogValue::JsonDiff(diffs) => ColumnValue::Json(serde_json::Value::Array(
            diffs
                .iter()
                .map(|diff| {
                    json!({
                        "path": diff.path_str(),
                        "operation": format!("{:?}", diff.operation()),
                        "value": diff.value().and_then(json_value),
                    })
                })
                .collect(),
        )),
    }
}

fn json_value(document: &jsonb::Value<'_>) -> Option<serde_json::Value> {
    match serde_json::Value::try_from(document.clone()) {
        Ok(json) => Some(json),
        Err(e) => {
            warn!("Undecodable JSON column value: {:?}", e);
            None
        }
    }
}

fn convert_sql_value(value: &Value, column_type: Option<ColumnType>) -> ColumnValue {
    match value {
        Value::NULL => ColumnValue::Null,
        Value::Bytes(bytes) => ColumnValue::Bytes(bytes.clone()),
        Value::Int(value) => ColumnValue::Int(*value),
        Value::UInt(value) => ColumnValue::UInt(*value),
        Value::Float(value) => ColumnValue::Float(f64::from(*value)),
        Value::Double(value) => ColumnValue::Float(*value),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            let date = NaiveDate::from_ymd_opt(i32::from(*year), u32::from(*month), u32::from(*day));
            match (date, column_type) {
                (Some(date), Some(ColumnType::MYSQL_TYPE_DATE)) => ColumnValue::Date(date),
                (Some(date), _) => date
                    .and_hms_micro_opt(
                        u32::from(*hour),
                        u32::from(*minute),
                        u32::from(*second),
                        *micros,
                    )
                    .map(ColumnValue::DateTime)
                    .unwrap_or_else(|| ColumnValue::Text(date.to_string())),
                // Zero dates such as 0000-00-00 have no calendar equivalent
                (None, _) => ColumnValue::Text(format!(
                    "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, minute, second
                )),
            }
        }
        Value::Time(negative, days, hours, minutes, seconds, micros) => {
            let magnitude = TimeDelta::days(i64::from(*days))
                + TimeDelta::hours(i64::from(*hours))
                + TimeDelta::minutes(i64::from(*minutes))
                + TimeDelta::seconds(i64::from(*seconds))
                + TimeDelta::microseconds(i64::from(*micros));
            ColumnValue::Time(if *negative { -magnitude } else { magnitude })
        }
    }
}
