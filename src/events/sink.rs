//! Event sink implementations for change records
//!
//! Provides the sink trait, the console sink used in development, the Pub/Sub
//! sink used in production, and the dispatcher that applies the delivery
//! failure policy.

use super::record::ChangeRecord;
use crate::core::errors::{RelayError, RelayResult};
use async_trait::async_trait;
use tracing::{debug, error};

pub mod console;
pub mod pubsub;

/// Destination for canonical change records
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Short name used in logs
    fn sink_type(&self) -> &'static str;

    /// Deliver one record, returning once the destination has accepted it
    async fn send_event(&self, record: &ChangeRecord) -> RelayResult<()>;
}

/// Delivers records to the process-wide sink.
///
/// Publish failures are logged with the record's operation and table and the
/// record is dropped. Any other failure (the console device) is returned.
pub struct SinkDispatcher {
    sink: Box<dyn EventSink>,
    delivered: u64,
    dropped: u64,
}

impl SinkDispatcher {
    pub fn new(sink: Box<dyn EventSink>) -> Self {
        Self {
            sink,
            delivered: 0,
            dropped: 0,
        }
    }

    pub fn sink_type(&self) -> &'static str {
        self.sink.sink_type()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub async fn publish(&mut self, record: &ChangeRecord) -> RelayResult<()> {
        match self.sink.send_event(record).await {
            Ok(()) => {
                self.delivered += 1;
                debug!(
                    "Delivered {} on {}.{} via {}",
                    record.operation(),
                    record.database(),
                    record.table(),
                    self.sink.sink_type()
                );
                Ok(())
            }
            Err(e @ RelayError::Publish { .. }) => {
                self.dropped += 1;
                error!(
                    "Dropping {} on {}.{}: {}",
                    record.operation(),
                    record.database(),
                    record.table(),
                    e
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingSink;
    use super::*;
    use crate::replication::messages::RowImage;
    use chrono::Utc;
    use std::io;

    fn record(table: &str) -> ChangeRecord {
        ChangeRecord::insert("testdb", table, RowImage::new(), RowImage::new(), Utc::now())
    }

    struct BrokenTerminal;

    #[async_trait]
    impl EventSink for BrokenTerminal {
        fn sink_type(&self) -> &'static str {
            "console"
        }

        async fn send_event(&self, _record: &ChangeRecord) -> RelayResult<()> {
            Err(RelayError::Output(io::Error::from(io::ErrorKind::BrokenPipe)))
        }
    }

    #[tokio::test]
    async fn test_publish_failure_is_dropped_and_next_record_delivered() {
        let sink = RecordingSink {
            failing_tables: vec!["orders".into()],
            ..Default::default()
        };
        let delivered = sink.delivered.clone();
        let mut dispatcher = SinkDispatcher::new(Box::new(sink));

        dispatcher.publish(&record("orders")).await.unwrap();
        dispatcher.publish(&record("users")).await.unwrap();

        assert_eq!(dispatcher.dropped(), 1);
        assert_eq!(dispatcher.delivered(), 1);
        let delivered = delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].table(), "users");
    }

    #[tokio::test]
    async fn test_output_failure_propagates() {
        let mut dispatcher = SinkDispatcher::new(Box::new(BrokenTerminal));

        let err = dispatcher.publish(&record("users")).await.unwrap_err();

        assert!(matches!(err, RelayError::Output(_)));
        assert_eq!(dispatcher.dropped(), 0);
    }
}
