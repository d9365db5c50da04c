//! Event processing module for change records
//!
//! This module turns raw row events into canonical change records and
//! delivers them to the active sink (console or Pub/Sub).

pub mod normalizer;
pub mod record;
pub mod sink;

// Re-export for convenience
pub use normalizer::normalize;
pub use sink::SinkDispatcher;
