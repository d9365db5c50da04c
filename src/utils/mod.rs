//! Utility functions for the binlog relay
//!
//! This module provides utility functions organized by category:
//! - ISO-8601 timestamp rendering
//! - Atomic file replacement

pub mod fs;
pub mod timestamp;
