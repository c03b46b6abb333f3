//! Position ledger.
//!
//! Applies executed fills to maintain the net position per symbol and the
//! realized outcome of every round trip. The ledger is the only writer of
//! [`Position`] and [`ClosedTrade`] state; reconciliation and promotion work
//! on a [`LedgerSnapshot`] copied out between fills.
//!
//! # Average price
//!
//! Increases use a running volume-weighted average. Reductions leave the
//! average unchanged, a flip through zero re-bases it at the flipping fill's
//! price, and a flat position carries an average of 0.
//!
//! # Decision legs
//!
//! Fills are grouped by `(symbol, decision_id)`. Same-side fills grow the
//! entry, opposite-side fills accumulate the exit. Once the exit fully offsets
//! the entry a [`ClosedTrade`] is emitted; any excess opens a new leg in the
//! exit direction under the same decision id.

use ahash::AHashMap;
use chrono::{DateTime, Utc};
use sentinel_core::{
    ClosedTrade, Fill, FillRecord, Position, Result, SentinelError, Side, time_util::to_iso8601,
};
use serde::Serialize;
use tracing::{debug, info};

/// Quantities closer than this to zero are treated as zero.
pub const UNIT_EPSILON: f64 = 1e-9;

/// An open round trip awaiting its exit.
#[derive(Debug, Clone)]
struct OpenLeg {
    strategy_id: Option<String>,
    side: Side,
    entry_units: f64,
    entry_notional: f64,
    exit_units: f64,
    exit_notional: f64,
    opened_at: DateTime<Utc>,
}

impl OpenLeg {
    fn open(fill: &Fill, units: f64) -> Self {
        Self {
            strategy_id: fill.strategy_id.clone(),
            side: fill.side,
            entry_units: units,
            entry_notional: units * fill.price,
            exit_units: 0.0,
            exit_notional: 0.0,
            opened_at: fill.timestamp,
        }
    }

    fn remaining(&self) -> f64 {
        self.entry_units - self.exit_units
    }
}

/// What a single fill did to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct FillOutcome {
    /// Position for the fill's symbol after the fill.
    pub position: Position,
    /// Round trip completed by this fill, if any.
    pub closed: Option<ClosedTrade>,
}

/// Immutable point-in-time copy of the ledger.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerSnapshot {
    /// Positions in first-seen order, flat ones included.
    pub positions: Vec<Position>,
    /// Closed trades in close order.
    pub closed_trades: Vec<ClosedTrade>,
    pub fill_count: usize,
}

impl LedgerSnapshot {
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.symbol == symbol)
    }
}

/// Net positions and trade history built from fills.
///
/// No internal locking: callers serialize `record_fill` per symbol and copy
/// state out with [`snapshot`](PositionLedger::snapshot) before evaluating.
#[derive(Debug, Default)]
pub struct PositionLedger {
    positions: Vec<Position>,
    index: AHashMap<String, usize>,
    legs: AHashMap<(String, String), OpenLeg>,
    closed: Vec<ClosedTrade>,
    fills: Vec<FillRecord>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one executed fill.
    ///
    /// Fails with [`SentinelError::InvalidFill`] when units or price are not
    /// strictly positive and finite; the ledger is untouched in that case.
    pub fn record_fill(
        &mut self,
        fill: Fill,
        schema_version: u32,
        risk_config_hash: &str,
        source_adapter: &str,
        correlation_id: &str,
    ) -> Result<FillOutcome> {
        validate_fill(&fill)?;

        let position = self.apply_to_position(&fill);
        let closed = self.apply_to_leg(&fill);

        debug!(
            symbol = %fill.symbol,
            decision_id = %fill.decision_id,
            side = %fill.side,
            units = fill.units,
            price = fill.price,
            net_units = position.net_units,
            correlation_id,
            "fill recorded"
        );
        if let Some(ref trade) = closed {
            info!(
                symbol = %trade.symbol,
                decision_id = %trade.decision_id,
                units = trade.units,
                entry = trade.entry_price,
                exit = trade.exit_price,
                pnl = trade.realized_pnl,
                closed_at = %to_iso8601(&trade.closed_at),
                "round trip closed"
            );
            self.closed.push(trade.clone());
        }

        self.fills.push(FillRecord {
            fill,
            schema_version,
            risk_config_hash: risk_config_hash.to_string(),
            source_adapter: source_adapter.to_string(),
            correlation_id: correlation_id.to_string(),
        });

        Ok(FillOutcome { position, closed })
    }

    fn apply_to_position(&mut self, fill: &Fill) -> Position {
        let idx = match self.index.get(&fill.symbol) {
            Some(&idx) => idx,
            None => {
                self.positions.push(Position {
                    symbol: fill.symbol.clone(),
                    net_units: 0.0,
                    avg_price: 0.0,
                });
                let idx = self.positions.len() - 1;
                self.index.insert(fill.symbol.clone(), idx);
                idx
            }
        };

        let pos = &mut self.positions[idx];
        let prev = pos.net_units;
        let delta = fill.signed_units();
        let next = prev + delta;

        if prev.abs() < UNIT_EPSILON || prev.signum() == delta.signum() {
            let held = prev.abs();
            pos.avg_price = (held * pos.avg_price + fill.units * fill.price) / (held + fill.units);
            pos.net_units = next;
        } else if next.abs() < UNIT_EPSILON {
            pos.net_units = 0.0;
            pos.avg_price = 0.0;
        } else {
            if next.signum() != prev.signum() {
                pos.avg_price = fill.price;
            }
            pos.net_units = next;
        }
        pos.clone()
    }

    fn apply_to_leg(&mut self, fill: &Fill) -> Option<ClosedTrade> {
        let key = (fill.symbol.clone(), fill.decision_id.clone());

        let Some(leg) = self.legs.get_mut(&key) else {
            self.legs.insert(key, OpenLeg::open(fill, fill.units));
            return None;
        };

        if leg.side == fill.side {
            leg.entry_units += fill.units;
            leg.entry_notional += fill.units * fill.price;
            return None;
        }

        let take = fill.units.min(leg.remaining());
        leg.exit_units += take;
        leg.exit_notional += take * fill.price;
        if leg.remaining() > UNIT_EPSILON {
            return None;
        }

        let leg = self.legs.remove(&key)?;
        let entry_price = leg.entry_notional / leg.entry_units;
        let exit_price = leg.exit_notional / leg.exit_units;
        let trade = ClosedTrade {
            decision_id: fill.decision_id.clone(),
            symbol: fill.symbol.clone(),
            strategy_id: leg.strategy_id,
            side: leg.side,
            units: leg.entry_units,
            entry_price,
            exit_price,
            opened_at: leg.opened_at,
            closed_at: fill.timestamp,
            realized_pnl: (exit_price - entry_price) * leg.entry_units * leg.side.sign(),
        };

        let excess = fill.units - take;
        if excess > UNIT_EPSILON {
            self.legs.insert(key, OpenLeg::open(fill, excess));
        }
        Some(trade)
    }

    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.index.get(symbol).map(|&idx| &self.positions[idx])
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn closed_trades(&self) -> &[ClosedTrade] {
        &self.closed
    }

    pub fn fills(&self) -> &[FillRecord] {
        &self.fills
    }

    /// Number of decisions with an entry but no completed exit.
    pub fn open_decisions(&self) -> usize {
        self.legs.len()
    }

    /// Copy out a consistent view for reconciliation and promotion.
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            positions: self.positions.clone(),
            closed_trades: self.closed.clone(),
            fill_count: self.fills.len(),
        }
    }
}

fn validate_fill(fill: &Fill) -> Result<()> {
    if !(fill.units.is_finite() && fill.units > 0.0) {
        return Err(SentinelError::InvalidFill(format!(
            "{} {}: units must be > 0, got {}",
            fill.symbol, fill.trade_id, fill.units
        )));
    }
    if !(fill.price.is_finite() && fill.price > 0.0) {
        return Err(SentinelError::InvalidFill(format!(
            "{} {}: price must be > 0, got {}",
            fill.symbol, fill.trade_id, fill.price
        )));
    }
    if fill.symbol.is_empty() || fill.decision_id.is_empty() {
        return Err(SentinelError::InvalidFill(format!(
            "trade {}: symbol and decision_id are required",
            fill.trade_id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::{Duration, TimeZone};

    fn fill(decision: &str, side: Side, units: f64, price: f64, minute: i64) -> Fill {
        Fill {
            trade_id: format!("t-{decision}-{minute}"),
            decision_id: decision.into(),
            symbol: "EURUSD".into(),
            strategy_id: Some("mr_v2".into()),
            side,
            price,
            units,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + Duration::minutes(minute),
        }
    }

    fn record(ledger: &mut PositionLedger, f: Fill) -> Result<FillOutcome> {
        ledger.record_fill(f, 1, "hash", "test", "corr")
    }

    #[test]
    fn weighted_average_on_increase() {
        let mut l = PositionLedger::new();
        record(&mut l, fill("d1", Side::Buy, 1000.0, 1.1000, 0)).unwrap();
        let out = record(&mut l, fill("d2", Side::Buy, 1000.0, 1.1200, 1)).unwrap();
        assert_eq!(out.position.net_units, 2000.0);
        assert_abs_diff_eq!(out.position.avg_price, 1.1100, epsilon = 1e-12);
    }

    #[test]
    fn reduction_keeps_average_and_flip_rebases() {
        let mut l = PositionLedger::new();
        record(&mut l, fill("d1", Side::Buy, 1000.0, 1.10, 0)).unwrap();
        let out = record(&mut l, fill("d2", Side::Sell, 400.0, 1.20, 1)).unwrap();
        assert_eq!(out.position.net_units, 600.0);
        assert_eq!(out.position.avg_price, 1.10);

        let out = record(&mut l, fill("d3", Side::Sell, 1000.0, 1.30, 2)).unwrap();
        assert_abs_diff_eq!(out.position.net_units, -400.0, epsilon = UNIT_EPSILON);
        assert_eq!(out.position.avg_price, 1.30);
    }

    #[test]
    fn offsetting_fill_closes_round_trip() {
        let mut l = PositionLedger::new();
        record(&mut l, fill("d1", Side::Buy, 1000.0, 1.1000, 0)).unwrap();
        let out = record(&mut l, fill("d1", Side::Sell, 1000.0, 1.1050, 5)).unwrap();
        let trade = out.closed.unwrap();
        assert_eq!(out.position.net_units, 0.0);
        assert_eq!(out.position.avg_price, 0.0);
        assert_abs_diff_eq!(trade.realized_pnl, 5.0, epsilon = 1e-9);
        assert_eq!(trade.strategy_id.as_deref(), Some("mr_v2"));
        assert_eq!(l.open_decisions(), 0);
        assert_eq!(l.closed_trades().len(), 1);
    }

    #[test]
    fn short_round_trip_pnl_sign() {
        let mut l = PositionLedger::new();
        record(&mut l, fill("d1", Side::Sell, 100.0, 2.0, 0)).unwrap();
        let trade = record(&mut l, fill("d1", Side::Buy, 100.0, 1.5, 1)).unwrap().closed.unwrap();
        assert_abs_diff_eq!(trade.realized_pnl, 50.0, epsilon = 1e-9);
        assert!(trade.is_win());
    }

    #[test]
    fn partial_exits_close_once_fully_offset() {
        let mut l = PositionLedger::new();
        record(&mut l, fill("d1", Side::Buy, 1000.0, 1.00, 0)).unwrap();
        assert!(record(&mut l, fill("d1", Side::Sell, 400.0, 1.10, 1)).unwrap().closed.is_none());
        let trade = record(&mut l, fill("d1", Side::Sell, 600.0, 1.20, 2)).unwrap().closed.unwrap();
        assert_abs_diff_eq!(trade.exit_price, 1.16, epsilon = 1e-12);
        assert_abs_diff_eq!(trade.realized_pnl, 160.0, epsilon = 1e-9);
    }

    #[test]
    fn overshoot_opens_new_leg() {
        let mut l = PositionLedger::new();
        record(&mut l, fill("d1", Side::Buy, 100.0, 1.0, 0)).unwrap();
        let out = record(&mut l, fill("d1", Side::Sell, 150.0, 1.0, 1)).unwrap();
        assert!(out.closed.is_some());
        assert_eq!(out.position.net_units, -50.0);
        assert_eq!(l.open_decisions(), 1);
    }

    #[test]
    fn invalid_fill_leaves_state_untouched() {
        let mut l = PositionLedger::new();
        record(&mut l, fill("d1", Side::Buy, 10.0, 1.0, 0)).unwrap();
        let before = l.snapshot();
        let err = record(&mut l, fill("d2", Side::Buy, 0.0, 1.0, 1)).unwrap_err();
        assert!(matches!(err, SentinelError::InvalidFill(_)));
        assert!(record(&mut l, fill("d3", Side::Buy, -5.0, 1.0, 2)).is_err());
        assert!(record(&mut l, fill("d4", Side::Buy, 5.0, f64::NAN, 3)).is_err());
        assert_eq!(l.snapshot(), before);
    }

    #[test]
    fn fill_records_keep_audit_envelope() {
        let mut l = PositionLedger::new();
        l.record_fill(fill("d1", Side::Buy, 1.0, 1.0, 0), 3, "abc", "oanda", "c-1").unwrap();
        let rec = &l.fills()[0];
        assert_eq!(rec.schema_version, 3);
        assert_eq!(rec.risk_config_hash, "abc");
        assert_eq!(rec.source_adapter, "oanda");
        assert_eq!(rec.correlation_id, "c-1");
    }
}
