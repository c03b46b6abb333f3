//! # sentinel-core
//!
//! Shared foundation for the sentinel risk engines, providing:
//!
//! - **Types** (`types`): fills, positions, closed trades, bars, broker snapshots
//! - **Configuration** (`config`): strict, hashed JSON risk configuration
//! - **Error types** (`error`): the `SentinelError` taxonomy via thiserror
//! - **Deduplication** (`dedup`): TTL-bounded shadow alert register
//! - **Time utilities** (`time_util`): UTC clock and ISO-8601 helpers
//! - **Logging** (`logging`): tracing-based structured logging

pub mod config;
pub mod dedup;
pub mod error;
pub mod logging;
pub mod time_util;
pub mod types;

// Re-export types at crate root for convenience.
pub use error::{Result, SentinelError};
pub use types::*;
