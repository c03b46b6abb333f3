//! Replay events read from the JSON-lines input.
//!
//! One JSON object per line, tagged by `type`:
//!
//! ```text
//! {"type":"bar","interval":"5m","symbol":"EURUSD","period_start":...,"period_end":...,"open":..,"high":..,"low":..,"close":..}
//! {"type":"fill","trade_id":"t1","decision_id":"d1","symbol":"EURUSD","side":"buy","price":1.1,"units":1000,"timestamp":...}
//! {"type":"broker_snapshot","timestamp":...,"positions":[...],"orders":[...]}
//! {"type":"heartbeat","at":...,"connected":true}
//! ```

use chrono::{DateTime, Utc};
use sentinel_core::{Bar, BrokerSnapshot, Fill};
use serde::Deserialize;

/// Fill schema version assumed when an event does not carry one.
pub const DEFAULT_SCHEMA_VERSION: u32 = 1;

/// A typed event from the replay stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A closed price bar for the volatility gate.
    Bar {
        interval: String,
        #[serde(flatten)]
        bar: Bar,
    },

    /// An executed fill plus its audit envelope.
    Fill {
        #[serde(flatten)]
        fill: Fill,
        #[serde(default)]
        schema_version: Option<u32>,
        #[serde(default)]
        source_adapter: Option<String>,
        #[serde(default)]
        correlation_id: Option<String>,
    },

    /// The broker's view of positions and open orders.
    BrokerSnapshot(BrokerSnapshot),

    /// Transport liveness.
    Heartbeat {
        at: DateTime<Utc>,
        #[serde(default = "default_connected")]
        connected: bool,
        #[serde(default)]
        detail: Option<String>,
    },
}

fn default_connected() -> bool {
    true
}

impl Event {
    /// Event time, used as the replay clock.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::Bar { bar, .. } => bar.period_end,
            Event::Fill { fill, .. } => fill.timestamp,
            Event::BrokerSnapshot(snap) => snap.timestamp,
            Event::Heartbeat { at, .. } => *at,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::Bar { .. } => "bar",
            Event::Fill { .. } => "fill",
            Event::BrokerSnapshot(_) => "broker_snapshot",
            Event::Heartbeat { .. } => "heartbeat",
        }
    }
}

/// Parse one input line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Option<serde_json::Result<Event>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    Some(serde_json::from_str(line))
}
