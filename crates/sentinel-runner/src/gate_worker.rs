//! Volatility gate worker that runs on a dedicated thread.
//!
//! Receives bars from a crossbeam channel, feeds them to the
//! [`VolatilityGate`], evaluates after every accepted bar and publishes the
//! result to the shared [`EngineState`]. Shadow alerts are deduplicated by
//! decision id through a [`ShadowAlertRegister`].

use std::sync::Arc;

use crossbeam_channel::Receiver;
use sentinel_core::dedup::ShadowAlertRegister;
use sentinel_core::{Bar, SentinelError};
use sentinel_risk::{BarOutcome, EngineState, VolatilityGate};
use tracing::{debug, info, warn};

/// A bar tagged with the interval it was sampled at.
#[derive(Debug, Clone)]
pub struct GateMsg {
    pub interval: String,
    pub bar: Bar,
}

/// Counters returned when the worker exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GateWorkerStats {
    pub accepted: u64,
    pub ignored: u64,
    pub rejected: u64,
    pub alerts: u64,
}

/// Run the gate loop on the calling thread until every sender is dropped.
pub fn run_gate_loop(rx: Receiver<GateMsg>, mut gate: VolatilityGate, state: Arc<EngineState>) -> GateWorkerStats {
    let config = gate.config().clone();
    let mut register = ShadowAlertRegister::new(config.alert_ttl(), config.alert_register_capacity);
    let mut stats = GateWorkerStats::default();

    info!(interval = %config.interval, mode = %config.mode, "gate loop started");

    while let Ok(GateMsg { interval, bar }) = rx.recv() {
        match gate.on_bar(&bar, &interval) {
            Ok(BarOutcome::Accepted) => stats.accepted += 1,
            Ok(BarOutcome::Ignored) => {
                stats.ignored += 1;
                continue;
            }
            Err(e) => {
                stats.rejected += 1;
                warn!(symbol = %bar.symbol, error = %e, "bar rejected");
                continue;
            }
        }

        let decision = match gate.evaluate(&config, bar.period_end) {
            Ok(d) => Some(d),
            Err(SentinelError::NotReady(reason)) => {
                debug!(%reason, "gate warming up");
                None
            }
            Err(e) => {
                warn!(error = %e, "gate evaluation failed");
                None
            }
        };

        if let Some(ref d) = decision {
            if register.try_register(&d.decision_id, d.should_alert, bar.period_end) {
                stats.alerts += 1;
                warn!(
                    decision_id = %d.decision_id,
                    ewma = d.ewma,
                    bucket = %d.bucket,
                    blocked = d.blocked,
                    "gvrs alert"
                );
            }
        }
        state.update_gvrs(gate.snapshot(), decision);
    }

    info!(
        accepted = stats.accepted,
        ignored = stats.ignored,
        rejected = stats.rejected,
        alerts = stats.alerts,
        "gate loop exited"
    );
    stats
}
