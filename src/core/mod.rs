//! Core module containing fundamental types and configurations
//!
//! This module provides the basic building blocks for the relay,
//! including configuration management, the runtime context and error handling.

pub mod config;
pub mod context;
pub mod errors;

// Re-export for convenience
pub use config::{Environment, RelayConfig};
pub use context::RuntimeContext;
pub use errors::{RelayError, RelayResult};
