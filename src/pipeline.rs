//! Relay pipeline
//!
//! The supervisor's event handler: each raw event is normalized, every
//! resulting record is dispatched in order, and only then is the event's
//! coordinate (the start of its transaction) persisted. The start of every session is persisted too, so a
//! live start survives a restart that happens before the first event.
//! Shutdown is honored between records; an event cut short is not
//! checkpointed and is delivered again after a restart.

use crate::core::RelayResult;
use crate::events::{SinkDispatcher, normalize};
use crate::replication::messages::RawChangeEvent;
use crate::replication::position::{LogPosition, PositionStore};
use crate::replication::supervisor::EventHandler;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct RelayPipeline {
    dispatcher: SinkDispatcher,
    positions: PositionStore,
    shutdown: CancellationToken,
}

impl RelayPipeline {
    pub fn new(
        dispatcher: SinkDispatcher,
        positions: PositionStore,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            dispatcher,
            positions,
            shutdown,
        }
    }

    #[cfg(test)]
    pub fn dispatcher(&self) -> &SinkDispatcher {
        &self.dispatcher
    }

    fn checkpoint(&self, position: &LogPosition) {
        if let Err(e) = self.positions.save(position) {
            error!("Failed to persist position {}: {}", position, e);
        }
    }
}

#[async_trait]
impl EventHandler for RelayPipeline {
    async fn on_session_start(&mut self, position: &LogPosition) -> RelayResult<()> {
        self.checkpoint(position);
        Ok(())
    }

    async fn handle_event(&mut self, event: RawChangeEvent) -> RelayResult<()> {
        let records = normalize(&event);

        for (index, record) in records.iter().enumerate() {
            if self.shutdown.is_cancelled() {
                warn!(
                    "Shutdown requested after {} of {} records at {}; event will be replayed",
                    index,
                    records.len(),
                    event.position
                );
                return Ok(());
            }
            self.dispatcher.publish(record).await?;
        }

        self.checkpoint(&event.position);
        Ok(())
    }
}

impl Drop for RelayPipeline {
    fn drop(&mut self) {
        info!(
            "Relay pipeline finished: {} records delivered, {} dropped",
            self.dispatcher.delivered(),
            self.dispatcher.dropped()
        );
    }
}
