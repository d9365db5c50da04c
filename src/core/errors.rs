//! Error types for the binlog relay
//! Provides structured error handling using thiserror, one variant per failure class

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the binlog relay
#[derive(Error, Debug)]
pub enum RelayError {
    /// Change-log capture disabled, unknown environment, missing settings.
    /// Never retried.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Transport drop, protocol desync or unexpected session close
    #[error("Stream error: {message}")]
    Stream {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Delivery to the message bus failed for a single record
    #[error("Publish error on {sink} sink: {message}")]
    Publish { message: String, sink: String },

    /// Position file could not be read, parsed or written
    #[error("Storage error at {path:?}: {message}")]
    Storage {
        message: String,
        path: PathBuf,
        source: Option<std::io::Error>,
    },

    /// The operator-facing terminal rejected a write
    #[error("Console output error")]
    Output(#[source] std::io::Error),

    #[error("Serialization error")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for convenience
pub type RelayResult<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a stream error
    pub fn stream<S: Into<String>>(message: S) -> Self {
        Self::Stream {
            message: message.into(),
            source: None,
        }
    }

    /// Create a stream error wrapping the underlying client error
    pub fn stream_with_source<S, E>(message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Stream {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a publish error for the named sink
    pub fn publish<S: Into<String>, K: Into<String>>(message: S, sink: K) -> Self {
        Self::Publish {
            message: message.into(),
            sink: sink.into(),
        }
    }

    /// Create a storage error for the given file
    pub fn storage<S: Into<String>, P: Into<PathBuf>>(message: S, path: P) -> Self {
        Self::Storage {
            message: message.into(),
            path: path.into(),
            source: None,
        }
    }

    /// Create a storage error caused by an I/O failure
    pub fn storage_io<S: Into<String>, P: Into<PathBuf>>(
        message: S,
        path: P,
        source: std::io::Error,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            path: path.into(),
            source: Some(source),
        }
    }

    /// Only streaming failures are recovered by reconnecting
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Stream { .. })
    }
}
