//! Console event sink implementation
//!
//! Prints each record as a colored header naming the operation and table,
//! the indented JSON body and a separator line. Used in development.

use super::EventSink;
use crate::core::errors::{RelayError, RelayResult};
use crate::events::record::{ChangeRecord, Operation};
use async_trait::async_trait;
use std::io::{self, Write};
use std::sync::Mutex;

const RESET: &str = "\x1b[0m";
const SEPARATOR_WIDTH: usize = 50;

fn color(operation: Operation) -> &'static str {
    match operation {
        Operation::Insert => "\x1b[92m",
        Operation::Update => "\x1b[93m",
        Operation::Delete => "\x1b[91m",
    }
}

/// Event sink that writes records to a terminal-like writer
pub struct ConsoleSink<W: Write + Send> {
    out: Mutex<W>,
}

impl ConsoleSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn render(record: &ChangeRecord) -> RelayResult<String> {
        Ok(format!(
            "\n{}[{} on {}]{}\n{}\n{}\n",
            color(record.operation()),
            record.operation(),
            record.table(),
            RESET,
            record.to_pretty_json()?,
            "-".repeat(SEPARATOR_WIDTH)
        ))
    }
}

#[async_trait]
impl<W: Write + Send> EventSink for ConsoleSink<W> {
    fn sink_type(&self) -> &'static str {
        "console"
    }

    async fn send_event(&self, record: &ChangeRecord) -> RelayResult<()> {
        let text = Self::render(record)?;
        let mut out = self
            .out
            .lock()
            .map_err(|_| RelayError::Output(io::Error::other("console writer poisoned")))?;
        out.write_all(text.as_bytes()).map_err(RelayError::Output)?;
        out.flush().map_err(RelayError::Output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::messages::{ColumnValue, RowImage};
    use chrono::Utc;

    fn row() -> RowImage {
        [("id".to_string(), ColumnValue::Int(1))].into_iter().collect()
    }

    #[tokio::test]
    async fn test_console_layout() {
        let sink = ConsoleSink::new(Vec::new());
        let record = ChangeRecord::delete("testdb", "users", row(), row(), Utc::now());

        sink.send_event(&record).await.unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "");
        assert_eq!(lines[1], "\x1b[91m[DELETE on users]\x1b[0m");
        assert_eq!(lines[2], "{");
        assert!(text.contains("  \"operation\": \"DELETE\""));
        assert_eq!(lines.last().copied(), Some("-".repeat(50).as_str()));
    }

    #[tokio::test]
    async fn test_insert_header_is_green() {
        let sink = ConsoleSink::new(Vec::new());
        let record = ChangeRecord::insert("testdb", "users", row(), row(), Utc::now());

        sink.send_event(&record).await.unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert!(text.contains("\x1b[92m[INSERT on users]"));
    }

    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_write_failure_is_output_error() {
        let sink = ConsoleSink::new(ClosedPipe);
        let record = ChangeRecord::insert("testdb", "users", row(), row(), Utc::now());

        let err = sink.send_event(&record).await.unwrap_err();
        assert!(matches!(err, RelayError::Output(_)));
    }
}
