//! Enumerations used throughout the sentinel risk core.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Trading direction
// ---------------------------------------------------------------------------

/// Buy or sell direction of a fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// `+1.0` for buys, `-1.0` for sells.
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Self::Buy => 1.0,
            Self::Sell => -1.0,
        }
    }

    #[inline]
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// Outcome of comparing one symbol between engine and broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReconStatus {
    Match,
    Mismatch,
    Unknown,
}

impl fmt::Display for ReconStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Match => write!(f, "MATCH"),
            Self::Mismatch => write!(f, "MISMATCH"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// Which side holds state the other side does not know about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphanSide {
    /// The engine holds a position the broker does not confirm.
    Engine,
    /// The broker reports units or orders the engine has no record of.
    Broker,
}

// ---------------------------------------------------------------------------
// Volatility gate
// ---------------------------------------------------------------------------

/// GVRS risk bucket, ordered from least to most volatile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GvrsBucket {
    Calm,
    Moderate,
    Volatile,
}

impl GvrsBucket {
    /// Numeric level for gauges: calm=0, moderate=1, volatile=2.
    pub fn level(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for GvrsBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Calm => write!(f, "calm"),
            Self::Moderate => write!(f, "moderate"),
            Self::Volatile => write!(f, "volatile"),
        }
    }
}

/// Whether the volatility gate only advises (`Shadow`) or blocks (`Live`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    #[default]
    Shadow,
    Live,
}

impl fmt::Display for GateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shadow => write!(f, "shadow"),
            Self::Live => write!(f, "live"),
        }
    }
}

// ---------------------------------------------------------------------------
// Promotion
// ---------------------------------------------------------------------------

/// Result of one promotion evaluation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionDecision {
    Promoted,
    Demoted,
    /// Win ratio strictly between the two thresholds.
    Hold,
    /// Fewer attributable trades than `min_trades`.
    InsufficientSample,
    Disabled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_order_is_volatility_order() {
        assert!(GvrsBucket::Calm < GvrsBucket::Moderate);
        assert!(GvrsBucket::Moderate < GvrsBucket::Volatile);
        assert_eq!(GvrsBucket::Volatile.level(), 2);
    }

    #[test]
    fn side_sign() {
        assert_eq!(Side::Buy.sign(), 1.0);
        assert_eq!(Side::Sell.sign(), -1.0);
        assert_eq!(Side::Buy.opposite(), Side::Sell);
    }

    #[test]
    fn serde_names() {
        assert_eq!(serde_json::to_string(&ReconStatus::Mismatch).unwrap(), "\"MISMATCH\"");
        assert_eq!(serde_json::to_string(&GateMode::Live).unwrap(), "\"live\"");
        assert_eq!(
            serde_json::to_string(&PromotionDecision::InsufficientSample).unwrap(),
            "\"insufficient_sample\""
        );
    }
}
