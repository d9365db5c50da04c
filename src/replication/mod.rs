//! Replication module for MySQL binlog streaming
//!
//! This module owns the connection to the transaction log: log coordinates and
//! their persistence, the raw event model, and the supervisor that keeps a
//! streaming session alive across transport failures.

pub mod messages;
#[cfg(feature = "mysql")]
pub mod mysql;
pub mod position;
pub mod state;
pub mod supervisor;

// Re-export for convenience
#[cfg(feature = "mysql")]
pub use mysql::MysqlBinlogConnector;
pub use position::PositionStore;
pub use supervisor::StreamSupervisor;
