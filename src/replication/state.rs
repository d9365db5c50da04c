//! Supervisor state management
//!
//! Tracks the streaming session lifecycle, the most recently known log
//! coordinate and a few counters reported in logs.

use super::position::LogPosition;
use std::fmt;
use tracing::{debug, warn};

/// Lifecycle of the streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Streaming,
    Reconnecting,
    /// Terminal: a fatal error stopped the supervisor
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Streaming => "streaming",
            SessionState::Reconnecting => "reconnecting",
            SessionState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug)]
pub struct SupervisorState {
    pub session: SessionState,
    /// Most recently known coordinate; the resume point for the next connection
    pub position: Option<LogPosition>,
    pub reconnect_attempts: u64,
    pub events_processed: u64,
}

impl SupervisorState {
    pub fn new() -> Self {
        Self {
            session: SessionState::Disconnected,
            position: None,
            reconnect_attempts: 0,
            events_processed: 0,
        }
    }

    pub fn transition(&mut self, next: SessionState) {
        if self.session == SessionState::Failed {
            warn!("Ignoring transition to {} from terminal state", next);
            return;
        }
        debug!("Session state {} -> {}", self.session, next);
        if next == SessionState::Reconnecting {
            self.reconnect_attempts += 1;
        }
        self.session = next;
    }

    /// Record the coordinate the session resolved to right after connecting
    pub fn set_position(&mut self, position: LogPosition) {
        self.position = Some(position);
    }

    /// Record that an event was fully handled and advance the resume point
    pub fn advance(&mut self, position: LogPosition) {
        if let Some(current) = &self.position
            && current.regresses_to(&position)
        {
            warn!(
                "Log position moved backwards from {} to {}",
                current, position
            );
        }
        self.position = Some(position);
        self.events_processed += 1;
    }

    #[cfg(test)]
    pub fn is_failed(&self) -> bool {
        self.session == SessionState::Failed
    }
}

impl Default for SupervisorState {
    fn default() -> Self {
        Self::new()
    }
}
