//! Drives the engines from a stream of [`Event`]s.
//!
//! Bars go to the gate worker thread. Fills, broker snapshots and heartbeats
//! are handled inline. After every broker snapshot the ledger is frozen into
//! a snapshot, reconciled and scored for promotion.

use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use crossbeam_channel::Sender;
use sentinel_core::config::RiskConfig;
use sentinel_core::time_util::{now_utc, to_iso8601};
use sentinel_core::{BrokerSnapshot, Fill};
use sentinel_risk::{
    ConnectionState, EngineState, PositionLedger, PromotionRuntime, ReconciliationEngine, ReconciliationReport,
    VolatilityGate,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::event::{DEFAULT_SCHEMA_VERSION, Event};
use crate::gate_worker::{GateMsg, GateWorkerStats, run_gate_loop};

/// Bars buffered between the reader and the gate worker.
const GATE_CHANNEL_CAPACITY: usize = 4096;

/// Counters for one replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub events: u64,
    pub fills: u64,
    pub fills_rejected: u64,
    pub blackout_fills: u64,
    pub reconciliations: u64,
    pub bars_skipped: u64,
    pub gate: GateWorkerStats,
}

pub struct Replay {
    config: RiskConfig,
    state: Arc<EngineState>,
    ledger: PositionLedger,
    recon: ReconciliationEngine,
    promotion: Option<PromotionRuntime>,
    gate_tx: Option<Sender<GateMsg>>,
    gate_handle: Option<JoinHandle<GateWorkerStats>>,
    stats: ReplayStats,
}

impl Replay {
    /// Build the engines for `config` and start the gate worker if the gate
    /// section is present.
    pub fn new(config: RiskConfig, state: Arc<EngineState>) -> Result<Self> {
        let (gate_tx, gate_handle) = match config.global_volatility_gate.clone() {
            Some(gate_cfg) => {
                let gate = VolatilityGate::new(gate_cfg)?;
                let (tx, rx) = crossbeam_channel::bounded(GATE_CHANNEL_CAPACITY);
                let worker_state = Arc::clone(&state);
                let handle = std::thread::Builder::new()
                    .name("gvrs-gate".into())
                    .spawn(move || run_gate_loop(rx, gate, worker_state))
                    .context("failed to spawn gate worker")?;
                (Some(tx), Some(handle))
            }
            None => {
                info!("no global_volatility_gate section, bars will be skipped");
                (None, None)
            }
        };

        let promotion = config.promotion.clone().map(PromotionRuntime::new).transpose()?;

        Ok(Self {
            config,
            state,
            ledger: PositionLedger::new(),
            recon: ReconciliationEngine::new(),
            promotion,
            gate_tx,
            gate_handle,
            stats: ReplayStats::default(),
        })
    }

    pub fn handle(&mut self, event: Event) -> Result<()> {
        let at = event.timestamp();
        debug!(kind = event.kind(), at = %to_iso8601(&at), "event");

        match event {
            Event::Bar { interval, bar } => match self.gate_tx {
                Some(ref tx) => tx
                    .send(GateMsg { interval, bar })
                    .map_err(|_| anyhow!("gate worker stopped unexpectedly"))?,
                None => self.stats.bars_skipped += 1,
            },
            Event::Fill { fill, schema_version, source_adapter, correlation_id } => {
                let correlation_id = correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
                self.on_fill(
                    fill,
                    schema_version.unwrap_or(DEFAULT_SCHEMA_VERSION),
                    source_adapter.as_deref().unwrap_or("replay"),
                    &correlation_id,
                )?;
            }
            Event::BrokerSnapshot(snapshot) => self.on_broker_snapshot(&snapshot),
            Event::Heartbeat { at, connected, detail } => {
                if !connected {
                    warn!(at = %to_iso8601(&at), detail = ?detail, "broker disconnected");
                }
                self.state.update_connection(ConnectionState { connected, last_heartbeat_at: Some(at), detail });
            }
        }

        self.stats.events += 1;
        self.state.record_loop_tick(at);
        Ok(())
    }

    fn on_fill(&mut self, fill: Fill, schema_version: u32, source_adapter: &str, correlation_id: &str) -> Result<()> {
        if let Some(ev) = self.config.news_blackout.as_ref().and_then(|nb| nb.active_event(&fill.symbol, fill.timestamp)) {
            self.stats.blackout_fills += 1;
            warn!(
                symbol = %fill.symbol,
                trade_id = %fill.trade_id,
                event = %ev.name,
                event_at = %to_iso8601(&ev.at),
                "fill inside news blackout"
            );
        }

        let trade_id = fill.trade_id.clone();
        match self.ledger.record_fill(fill, schema_version, &self.config.config_hash, source_adapter, correlation_id) {
            Ok(_) => {
                self.stats.fills += 1;
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                self.stats.fills_rejected += 1;
                warn!(%trade_id, correlation_id, error = %e, "fill rejected");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn on_broker_snapshot(&mut self, broker: &BrokerSnapshot) {
        let ledger = self.ledger.snapshot();
        let records = self.recon.build(broker.timestamp, &ledger.positions, broker);
        let report = ReconciliationReport::new(now_utc(), broker.timestamp, records);
        self.stats.reconciliations += 1;

        let s = &report.summary;
        if s.is_clean() {
            info!(total = s.total, broker_ts = %to_iso8601(&broker.timestamp), "reconciliation clean");
        } else {
            warn!(
                total = s.total,
                mismatches = s.mismatches,
                unknowns = s.unknowns,
                engine_orphans = s.engine_orphans,
                broker_orphans = s.broker_orphans,
                "reconciliation found discrepancies"
            );
        }
        self.state.update_reconciliation(report);

        if let Some(ref mut runtime) = self.promotion {
            let snapshot = runtime.evaluate(&ledger, broker.timestamp);
            self.state.update_promotion(snapshot);
        }
    }

    /// Close the gate channel, wait for the worker and return the counters.
    pub fn finish(mut self) -> Result<ReplayStats> {
        drop(self.gate_tx.take());
        if let Some(handle) = self.gate_handle.take() {
            self.stats.gate = handle.join().map_err(|_| anyhow!("gate worker panicked"))?;
        }
        info!(
            events = self.stats.events,
            fills = self.stats.fills,
            fills_rejected = self.stats.fills_rejected,
            reconciliations = self.stats.reconciliations,
            open_decisions = self.ledger.open_decisions(),
            "replay finished"
        );
        Ok(self.stats)
    }

    pub fn last_event_at(&self) -> Option<DateTime<Utc>> {
        self.state.current_snapshot().loop_state.last_tick_at
    }
}
