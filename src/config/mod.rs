//! Service configuration and constants.
//!
//! This module provides:
//! - Configuration constants (timeouts, TTLs, key prefixes, etc.)
//! - CLI / environment option types and validation

mod constants;
mod types;

// Re-export all constants
pub use constants::*;
pub use types::{Config, LogFormat, LogLevel};
