//! Engine state aggregator.
//!
//! Holds the latest output of each decision engine plus connection and loop
//! metadata, and hands out immutable composites for reporting. It never
//! computes anything itself.
//!
//! The composite lives in an `Arc<EngineSnapshot>` behind a `RwLock`.
//! Writers clone-on-write the composite and swap their own field in;
//! readers take a cheap `Arc` clone and can never observe a torn composite.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use crate::gvrs::{GateDecision, GvrsSnapshot};
use crate::promotion::PromotionShadowSnapshot;
use crate::reconcile::ReconciliationReport;

/// Broker connectivity as last reported by the transport layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionState {
    pub connected: bool,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub detail: Option<String>,
}

/// Trading loop progress.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoopState {
    pub iterations: u64,
    pub last_tick_at: Option<DateTime<Utc>>,
}

/// Everything we currently believe, as one immutable value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineSnapshot {
    pub risk_config_hash: String,
    pub connection: ConnectionState,
    #[serde(rename = "loop")]
    pub loop_state: LoopState,
    pub reconciliation: Option<ReconciliationReport>,
    pub gvrs: Option<GvrsSnapshot>,
    pub last_gate_decision: Option<GateDecision>,
    pub promotion: Option<PromotionShadowSnapshot>,
}

/// Single point of truth shared by the engines and the reporting side.
///
/// Constructed once by whatever composes the engines and passed around as
/// `Arc<EngineState>`.
#[derive(Debug, Default)]
pub struct EngineState {
    inner: RwLock<Arc<EngineSnapshot>>,
}

impl EngineState {
    pub fn new(risk_config_hash: impl Into<String>) -> Self {
        let snapshot = EngineSnapshot { risk_config_hash: risk_config_hash.into(), ..Default::default() };
        Self { inner: RwLock::new(Arc::new(snapshot)) }
    }

    /// The current composite. Cheap; holds no lock after returning.
    pub fn current_snapshot(&self) -> Arc<EngineSnapshot> {
        self.inner.read().clone()
    }

    fn update(&self, f: impl FnOnce(&mut EngineSnapshot)) {
        let mut guard = self.inner.write();
        f(Arc::make_mut(&mut *guard));
    }

    pub fn update_reconciliation(&self, report: ReconciliationReport) {
        self.update(|s| s.reconciliation = Some(report));
    }

    pub fn update_gvrs(&self, snapshot: GvrsSnapshot, decision: Option<GateDecision>) {
        self.update(|s| {
            s.gvrs = Some(snapshot);
            if decision.is_some() {
                s.last_gate_decision = decision;
            }
        });
    }

    pub fn update_promotion(&self, snapshot: PromotionShadowSnapshot) {
        self.update(|s| s.promotion = Some(snapshot));
    }

    pub fn update_connection(&self, connection: ConnectionState) {
        self.update(|s| s.connection = connection);
    }

    pub fn record_loop_tick(&self, at: DateTime<Utc>) {
        self.update(|s| {
            s.loop_state.iterations += 1;
            s.loop_state.last_tick_at = Some(at);
        });
    }

    pub fn set_risk_config_hash(&self, hash: impl Into<String>) {
        let hash = hash.into();
        self.update(|s| s.risk_config_hash = hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn readers_keep_their_snapshot() {
        let state = EngineState::new("abc");
        let before = state.current_snapshot();
        state.record_loop_tick(Utc::now());
        assert_eq!(before.loop_state.iterations, 0);
        assert_eq!(state.current_snapshot().loop_state.iterations, 1);
        assert_eq!(state.current_snapshot().risk_config_hash, "abc");
    }

    #[test]
    fn concurrent_writers_do_not_lose_updates() {
        let state = Arc::new(EngineState::new("abc"));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    for _ in 0..250 {
                        state.record_loop_tick(Utc::now());
                    }
                })
            })
            .collect();
        let conn = {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                state.update_connection(ConnectionState {
                    connected: true,
                    last_heartbeat_at: Some(Utc::now()),
                    detail: None,
                })
            })
        };
        for h in handles {
            h.join().unwrap();
        }
        conn.join().unwrap();
        let snap = state.current_snapshot();
        assert_eq!(snap.loop_state.iterations, 1000);
        assert!(snap.connection.connected);
    }

    #[test]
    fn health_json_has_promotion_and_loop_keys() {
        let state = EngineState::new("abc");
        let json = serde_json::to_value(&*state.current_snapshot()).unwrap();
        assert!(json.get("promotion").is_some());
        assert!(json.get("loop").is_some());
        assert_eq!(json["risk_config_hash"], "abc");
    }
}
