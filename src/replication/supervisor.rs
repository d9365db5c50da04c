//! Stream supervisor
//!
//! Owns the streaming session to the transaction log. Events are handed to an
//! [`EventHandler`] one at a time, and the next event is requested only after
//! the handler returns, so commit order is preserved end to end. Transport
//! failures close the session, wait a fixed delay and reconnect from the most
//! recently known coordinate, forever. Configuration errors and handler
//! failures stop the supervisor.

use super::messages::RawChangeEvent;
use super::position::{LogPosition, StartPosition};
use super::state::{SessionState, SupervisorState};
use crate::core::{RelayError, RelayResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Opens streaming sessions against the source database
#[async_trait]
pub trait ChangeStreamConnector: Send + Sync {
    /// Open a session filtered to row insert/update/delete events, beginning at `start`.
    ///
    /// Fails with a configuration error when change-log capture is disabled.
    async fn connect(&self, start: &StartPosition) -> RelayResult<Box<dyn ChangeStream>>;
}

/// An open streaming session
#[async_trait]
pub trait ChangeStream: Send {
    /// Safe resume coordinate. Right after connecting this is the session's
    /// start, with a live start already resolved.
    fn position(&self) -> &LogPosition;

    /// Wait for the next row event. `Ok(None)` means the server ended the session.
    async fn next_event(&mut self) -> RelayResult<Option<RawChangeEvent>>;

    /// Release the session and any connection it holds
    async fn close(self: Box<Self>) -> RelayResult<()>;
}

/// Receives every raw event in log order
#[async_trait]
pub trait EventHandler: Send {
    /// Called once per session, before any event, with the resolved start coordinate
    async fn on_session_start(&mut self, _position: &LogPosition) -> RelayResult<()> {
        Ok(())
    }

    async fn handle_event(&mut self, event: RawChangeEvent) -> RelayResult<()>;
}

pub struct StreamSupervisor<C> {
    connector: C,
    reconnect_delay: Duration,
    shutdown: CancellationToken,
    state: SupervisorState,
}

impl<C: ChangeStreamConnector> StreamSupervisor<C> {
    pub fn new(connector: C, reconnect_delay: Duration, shutdown: CancellationToken) -> Self {
        Self {
            connector,
            reconnect_delay,
            shutdown,
            state: SupervisorState::new(),
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &SupervisorState {
        &self.state
    }

    /// Stream events into `handler` until shutdown is requested or a fatal error occurs.
    ///
    /// Returns `Ok(())` only after cancellation. Stream errors never escape.
    pub async fn run<H: EventHandler>(
        &mut self,
        start: StartPosition,
        handler: &mut H,
    ) -> RelayResult<()> {
        let mut resume = start;

        loop {
            if self.shutdown.is_cancelled() {
                self.stop();
                return Ok(());
            }

            self.state.transition(SessionState::Connecting);
            info!("Connecting to the transaction log at {}", resume);

            let connected = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.stop();
                    return Ok(());
                }
                result = self.connector.connect(&resume) => result,
            };

            let failure = match connected {
                Ok(mut stream) => {
                    let position = stream.position().clone();
                    info!("Streaming changes from {}", position);
                    self.state.set_position(position.clone());
                    resume = StartPosition::At(position);
                    self.state.transition(SessionState::Streaming);

                    let outcome = self
                        .stream_events(stream.as_mut(), handler, &mut resume)
                        .await;

                    if let Err(e) = stream.close().await {
                        warn!("Failed to close the streaming session cleanly: {}", e);
                    }

                    match outcome {
                        Ok(()) => {
                            self.stop();
                            return Ok(());
                        }
                        Err(e) => e,
                    }
                }
                Err(e) => e,
            };

            if !failure.is_retryable() {
                self.state.transition(SessionState::Failed);
                error!("CDC processing stopped: {}", failure);
                return Err(failure);
            }

            self.state.transition(SessionState::Reconnecting);
            error!("CDC processing error: {}", failure);
            warn!(
                "Reconnecting in {:?} from {} (attempt {})",
                self.reconnect_delay, resume, self.state.reconnect_attempts
            );

            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    self.stop();
                    return Ok(());
                }
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }

    async fn stream_events<H: EventHandler>(
        &mut self,
        stream: &mut dyn ChangeStream,
        handler: &mut H,
        resume: &mut StartPosition,
    ) -> RelayResult<()> {
        let start = stream.position().clone();
        handler.on_session_start(&start).await?;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Ok(()),
                next = stream.next_event() => next?,
            };

            let Some(event) = next else {
                return Err(RelayError::stream("Streaming session closed by the server"));
            };

            let position = event.position.clone();
            debug!(
                "{} on {}.{} ({} rows), transaction from {}",
                event.kind(),
                event.schema,
                event.table,
                event.rows.len(),
                position
            );

            handler.handle_event(event).await?;

            self.state.advance(position.clone());
            *resume = StartPosition::At(position);
        }
    }

    fn stop(&mut self) {
        self.state.transition(SessionState::Disconnected);
        info!(
            "Stream supervisor stopped after {} events",
            self.state.events_processed
        );
    }
}
