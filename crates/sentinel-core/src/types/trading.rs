//! Trading-related data structures: fills, positions, closed trades and the
//! broker's account snapshot.
//!
//! The Position Ledger is the only writer of [`Position`] and [`ClosedTrade`];
//! everything else receives copies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::Side;

// ---------------------------------------------------------------------------
// Fill (order-management layer → ledger)
// ---------------------------------------------------------------------------

/// One executed trade leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    /// Execution id assigned by the venue.
    pub trade_id: String,
    /// Strategy decision this leg belongs to; entry and exit share it.
    pub decision_id: String,
    pub symbol: String,
    /// Strategy that produced the decision, used for promotion attribution.
    #[serde(default)]
    pub strategy_id: Option<String>,
    pub side: Side,
    pub price: f64,
    /// Always positive; direction is carried by `side`.
    pub units: f64,
    pub timestamp: DateTime<Utc>,
}

impl Fill {
    /// Signed unit delta this fill applies to the net position.
    #[inline]
    pub fn signed_units(&self) -> f64 {
        self.units * self.side.sign()
    }
}

/// A fill as stored by the ledger, with its audit envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillRecord {
    pub fill: Fill,
    pub schema_version: u32,
    pub risk_config_hash: String,
    pub source_adapter: String,
    pub correlation_id: String,
}

// ---------------------------------------------------------------------------
// Position / ClosedTrade (ledger-owned)
// ---------------------------------------------------------------------------

/// Net exposure for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    /// Positive = long, negative = short, zero = flat.
    pub net_units: f64,
    /// Volume-weighted entry price of the open quantity; 0 when flat.
    pub avg_price: f64,
}

/// A completed round trip for one decision id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub decision_id: String,
    pub symbol: String,
    pub strategy_id: Option<String>,
    /// Side of the entry leg.
    pub side: Side,
    pub units: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    /// `(exit - entry) * units * sign(entry side)`.
    pub realized_pnl: f64,
}

impl ClosedTrade {
    #[inline]
    pub fn is_win(&self) -> bool {
        self.realized_pnl > 0.0
    }
}

// ---------------------------------------------------------------------------
// Broker snapshot (external ground truth)
// ---------------------------------------------------------------------------

/// Net position as reported by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub units: f64,
    #[serde(default)]
    pub avg_price: Option<f64>,
}

/// A working order on the broker's side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub units: f64,
    #[serde(default)]
    pub price: Option<f64>,
}

/// The broker's account state at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerSnapshot {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub positions: Vec<BrokerPosition>,
    #[serde(default)]
    pub orders: Vec<BrokerOrder>,
}

impl BrokerSnapshot {
    pub fn position(&self, symbol: &str) -> Option<&BrokerPosition> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }

    pub fn open_orders(&self, symbol: &str) -> usize {
        self.orders.iter().filter(|o| o.symbol == symbol).count()
    }
}
