//! Typed error definitions for the sentinel risk core.
//!
//! [`SentinelError`] separates the three classes of failure the engines can
//! report: configuration errors (fatal at construction), input errors
//! (rejected per call, prior state untouched) and not-ready errors (the caller
//! should simply defer). All variants implement `std::error::Error` via
//! `thiserror`, so they integrate with `anyhow::Result` in the runner.

use thiserror::Error;

/// Result alias used by every engine in the workspace.
pub type Result<T> = std::result::Result<T, SentinelError>;

/// Domain-specific errors for the sentinel risk core.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SentinelError {
    /// Malformed thresholds, inverted bounds, or a missing required section.
    #[error("config error: {0}")]
    Config(String),

    /// A fill with non-positive units or an unusable price.
    #[error("invalid fill: {0}")]
    InvalidFill(String),

    /// A bar with non-finite prices or `high < low`.
    #[error("invalid bar: {0}")]
    InvalidBar(String),

    /// A bar for a symbol the volatility gate is not configured to track.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(String),

    /// A bar older than the last bar seen for the same symbol.
    #[error("out-of-order bar for {symbol}: {bar_ts} < last {last_ts}")]
    OutOfOrderBar { symbol: String, bar_ts: String, last_ts: String },

    /// Evaluation requested before enough samples exist.
    #[error("not ready: {0}")]
    NotReady(String),
}

impl SentinelError {
    /// `true` for errors that only affect the current call.
    ///
    /// Configuration errors are the only unrecoverable class: a subsystem
    /// that reports one must not be started.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_fatal() {
        assert!(!SentinelError::config("bad").is_recoverable());
        assert!(SentinelError::NotReady("warming up".into()).is_recoverable());
        assert!(SentinelError::InvalidFill("units=0".into()).is_recoverable());
    }

    #[test]
    fn display_carries_context() {
        let e = SentinelError::OutOfOrderBar {
            symbol: "EURUSD".into(),
            bar_ts: "2024-01-01T00:00:00Z".into(),
            last_ts: "2024-01-01T00:05:00Z".into(),
        };
        assert_eq!(
            e.to_string(),
            "out-of-order bar for EURUSD: 2024-01-01T00:00:00Z < last 2024-01-01T00:05:00Z"
        );
    }
}
