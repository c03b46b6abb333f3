//! Reconciliation engine.
//!
//! Compares the engine's positions against the broker's account snapshot and
//! classifies every symbol in the union of both sides:
//!
//! | Engine | Broker | Status |
//! |--------|--------|--------|
//! | present | position reported, same units (and price within tolerance) | `Match` |
//! | present | position reported, units or price differ | `Mismatch` |
//! | nonzero | no position reported | `Unknown` (engine orphan) |
//! | flat or absent | open orders only | `Unknown` (broker orphan) |
//! | absent | nonzero units | `Unknown` (broker orphan) |
//! | flat or absent | flat or absent | `Match` |
//!
//! Output order is engine positions first, then broker-only symbols, each in
//! first-seen order. The engine only classifies; alerting on the counts is
//! the caller's job (see [`ReconciliationSummary`]).

use ahash::AHashSet;
use chrono::{DateTime, Utc};
use csv::{Terminator, WriterBuilder};
use sentinel_core::{
    BrokerPosition, BrokerSnapshot, OrphanSide, Position, ReconStatus, time_util::to_iso8601,
};
use serde::Serialize;
use tracing::debug;

use crate::ledger::UNIT_EPSILON;

/// Absolute average-price tolerance when the broker reports a price.
pub const PRICE_TOLERANCE: f64 = 1e-5;

/// Header of the CSV produced by [`ReconciliationReport::to_csv`].
pub const CSV_COLUMNS: [&str; 4] = ["utc_ts", "symbol", "status", "reason"];

/// Outcome of comparing one symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationRecord {
    pub utc_ts: DateTime<Utc>,
    pub symbol: String,
    pub status: ReconStatus,
    pub reason: String,
    /// Set for `Unknown` records: the side that holds state alone.
    pub orphan: Option<OrphanSide>,
    pub engine_units: Option<f64>,
    pub broker_units: Option<f64>,
}

impl ReconciliationRecord {
    /// Render as one `utc_ts,symbol,status,reason` line (no terminator),
    /// quoted per RFC 4180 where needed.
    pub fn csv_row(&self) -> csv::Result<String> {
        let mut wtr = csv_writer();
        wtr.serialize(CsvRow::from(self))?;
        let mut line = finish(wtr)?;
        line.truncate(line.trim_end_matches('\n').len());
        Ok(line)
    }
}

/// Column layout of the reconciliation CSV.
#[derive(Serialize)]
struct CsvRow<'a> {
    utc_ts: String,
    symbol: &'a str,
    status: ReconStatus,
    reason: &'a str,
}

impl<'a> From<&'a ReconciliationRecord> for CsvRow<'a> {
    fn from(r: &'a ReconciliationRecord) -> Self {
        Self { utc_ts: to_iso8601(&r.utc_ts), symbol: &r.symbol, status: r.status, reason: &r.reason }
    }
}

fn csv_writer() -> csv::Writer<Vec<u8>> {
    WriterBuilder::new().has_headers(false).terminator(Terminator::Any(b'\n')).from_writer(Vec::new())
}

fn finish(wtr: csv::Writer<Vec<u8>>) -> csv::Result<String> {
    let bytes = wtr.into_inner().map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Counts a caller needs to decide whether to alert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationSummary {
    pub total: usize,
    pub matches: usize,
    pub mismatches: usize,
    pub unknowns: usize,
    pub engine_orphans: usize,
    pub broker_orphans: usize,
}

impl ReconciliationSummary {
    pub fn from_records(records: &[ReconciliationRecord]) -> Self {
        let mut s = Self { total: records.len(), ..Self::default() };
        for r in records {
            match r.status {
                ReconStatus::Match => s.matches += 1,
                ReconStatus::Mismatch => s.mismatches += 1,
                ReconStatus::Unknown => s.unknowns += 1,
            }
            match r.orphan {
                Some(OrphanSide::Engine) => s.engine_orphans += 1,
                Some(OrphanSide::Broker) => s.broker_orphans += 1,
                None => {}
            }
        }
        s
    }

    /// `true` when every symbol matched.
    pub fn is_clean(&self) -> bool {
        self.mismatches == 0 && self.unknowns == 0
    }
}

/// One reconciliation run, as held by the engine state aggregator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationReport {
    pub generated_at: DateTime<Utc>,
    pub broker_timestamp: DateTime<Utc>,
    pub summary: ReconciliationSummary,
    pub records: Vec<ReconciliationRecord>,
}

impl ReconciliationReport {
    pub fn new(
        generated_at: DateTime<Utc>,
        broker_timestamp: DateTime<Utc>,
        records: Vec<ReconciliationRecord>,
    ) -> Self {
        let summary = ReconciliationSummary::from_records(&records);
        Self { generated_at, broker_timestamp, summary, records }
    }

    /// CSV document with header, one line per record.
    pub fn to_csv(&self) -> csv::Result<String> {
        let mut wtr = csv_writer();
        wtr.write_record(CSV_COLUMNS)?;
        for r in &self.records {
            wtr.serialize(CsvRow::from(r))?;
        }
        finish(wtr)
    }
}

/// Classifies engine positions against a broker snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ReconciliationEngine {
    price_tolerance: f64,
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        Self { price_tolerance: PRICE_TOLERANCE }
    }

    pub fn with_price_tolerance(price_tolerance: f64) -> Self {
        Self { price_tolerance: price_tolerance.abs() }
    }

    /// Produce one record per symbol in the union of engine and broker sets.
    ///
    /// Never fails: missing data on either side is itself a classification.
    pub fn build(
        &self,
        now: DateTime<Utc>,
        engine_positions: &[Position],
        broker: &BrokerSnapshot,
    ) -> Vec<ReconciliationRecord> {
        let mut seen: AHashSet<&str> = AHashSet::new();
        let mut records = Vec::with_capacity(engine_positions.len() + broker.positions.len());

        for pos in engine_positions {
            if !seen.insert(pos.symbol.as_str()) {
                continue;
            }
            let flat = pos.net_units.abs() <= UNIT_EPSILON;
            let record = match broker.position(&pos.symbol) {
                Some(bpos) => self.compare(now, pos, bpos),
                None if flat && broker.open_orders(&pos.symbol) > 0 => {
                    let mut r = broker_only(now, &pos.symbol, broker);
                    r.engine_units = Some(pos.net_units);
                    r
                }
                None => engine_only(now, pos),
            };
            records.push(record);
        }

        let broker_symbols = broker
            .positions
            .iter()
            .map(|p| p.symbol.as_str())
            .chain(broker.orders.iter().map(|o| o.symbol.as_str()));
        for symbol in broker_symbols {
            if seen.insert(symbol) {
                records.push(broker_only(now, symbol, broker));
            }
        }

        for r in &records {
            debug!(symbol = %r.symbol, status = %r.status, reason = %r.reason, "reconciled");
        }
        records
    }

    fn compare(&self, now: DateTime<Utc>, pos: &Position, bpos: &BrokerPosition) -> ReconciliationRecord {
        let broker_units = bpos.units;
        let delta = pos.net_units - broker_units;

        let (status, reason) = if delta.abs() > UNIT_EPSILON {
            (
                ReconStatus::Mismatch,
                format!(
                    "units differ: engine {} vs broker {} (delta {})",
                    pos.net_units, broker_units, delta
                ),
            )
        } else {
            match bpos.avg_price {
                Some(bprice)
                    if pos.net_units.abs() > UNIT_EPSILON
                        && (pos.avg_price - bprice).abs() > self.price_tolerance =>
                {
                    (
                        ReconStatus::Mismatch,
                        format!("avg price differs: engine {} vs broker {}", pos.avg_price, bprice),
                    )
                }
                _ if pos.net_units.abs() <= UNIT_EPSILON => {
                    (ReconStatus::Match, "flat on both sides".to_string())
                }
                _ => (ReconStatus::Match, format!("units agree ({})", pos.net_units)),
            }
        };

        ReconciliationRecord {
            utc_ts: now,
            symbol: pos.symbol.clone(),
            status,
            reason,
            orphan: None,
            engine_units: Some(pos.net_units),
            broker_units: Some(broker_units),
        }
    }
}

fn engine_only(now: DateTime<Utc>, pos: &Position) -> ReconciliationRecord {
    let flat = pos.net_units.abs() <= UNIT_EPSILON;
    let (status, reason, orphan) = if flat {
        (ReconStatus::Match, "flat on both sides".to_string(), None)
    } else {
        (
            ReconStatus::Unknown,
            format!(
                "broker does not report {}; engine holds {} units (missing {})",
                pos.symbol,
                pos.net_units,
                pos.net_units.abs()
            ),
            Some(OrphanSide::Engine),
        )
    };
    ReconciliationRecord {
        utc_ts: now,
        symbol: pos.symbol.clone(),
        status,
        reason,
        orphan,
        engine_units: Some(pos.net_units),
        broker_units: None,
    }
}

fn broker_only(now: DateTime<Utc>, symbol: &str, broker: &BrokerSnapshot) -> ReconciliationRecord {
    let units = broker.position(symbol).map(|p| p.units).unwrap_or(0.0);
    let orders = broker.open_orders(symbol);
    let (status, reason, orphan) = if units.abs() <= UNIT_EPSILON && orders == 0 {
        (ReconStatus::Match, "flat on both sides".to_string(), None)
    } else {
        (
            ReconStatus::Unknown,
            format!(
                "engine has no record of {symbol}; broker reports {units} units and {orders} open order(s)"
            ),
            Some(OrphanSide::Broker),
        )
    };
    ReconciliationRecord {
        utc_ts: now,
        symbol: symbol.to_string(),
        status,
        reason,
        orphan,
        engine_units: None,
        broker_units: Some(units),
    }
}
