//! Log coordinates and their persistence
//!
//! The cursor file is a small JSON document, `{"log_file": ..., "log_pos": ...}`,
//! written by this process only. An absent file means "start from the log's
//! current live position".

use crate::core::{RelayError, RelayResult};
use crate::utils::fs::write_atomic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A `(file, offset)` point in the transaction log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPosition {
    #[serde(rename = "log_file")]
    pub file: String,
    #[serde(rename = "log_pos")]
    pub offset: u64,
}

impl LogPosition {
    pub fn new<S: Into<String>>(file: S, offset: u64) -> Self {
        Self {
            file: file.into(),
            offset,
        }
    }

    /// True when moving to `next` would go backwards inside the same file
    pub fn regresses_to(&self, next: &LogPosition) -> bool {
        self.file == next.file && next.offset < self.offset
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.offset)
    }
}

/// Where a streaming session should begin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartPosition {
    /// No saved state: begin at the log's current live coordinate
    Live,
    At(LogPosition),
}

impl fmt::Display for StartPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartPosition::Live => write!(f, "live position"),
            StartPosition::At(position) => write!(f, "{}", position),
        }
    }
}

/// File-backed store for the last processed coordinate
#[derive(Debug, Clone)]
pub struct PositionStore {
    path: PathBuf,
}

impl PositionStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted coordinate.
    ///
    /// A missing file, or a file whose `log_file` is empty, yields
    /// [`StartPosition::Live`]. Unreadable or unparseable contents are a
    /// storage error.
    pub fn load(&self) -> RelayResult<StartPosition> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(
                    "No saved position at {}, starting from the live position",
                    self.path.display()
                );
                return Ok(StartPosition::Live);
            }
            Err(e) => {
                return Err(RelayError::storage_io(
                    "Failed to read position file",
                    &self.path,
                    e,
                ));
            }
        };

        let position: LogPosition = serde_json::from_str(&contents).map_err(|e| {
            RelayError::storage(format!("Position file is corrupt: {}", e), &self.path)
        })?;

        if position.file.is_empty() {
            return Ok(StartPosition::Live);
        }

        info!("Loaded saved position {}", position);
        Ok(StartPosition::At(position))
    }

    /// Durably replace the persisted coordinate
    pub fn save(&self, position: &LogPosition) -> RelayResult<()> {
        let data = serde_json::to_vec(position)?;
        write_atomic(&self.path, &data).map_err(|e| {
            RelayError::storage_io("Failed to write position file", &self.path, e)
        })?;
        debug!("Saved position {}", position);
        Ok(())
    }
}
