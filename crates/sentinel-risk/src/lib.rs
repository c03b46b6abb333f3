//! # sentinel-risk
//!
//! The decision engines of the trading safety core:
//!
//! - [`ledger`]: applies fills, maintains net positions and closed round trips
//! - [`reconcile`]: classifies engine positions against the broker's snapshot
//! - [`gvrs`]: global volatility risk score, buckets and the live gate block
//! - [`promotion`]: probation/promotion/demotion of shadow strategies
//! - [`state`]: the aggregator holding the latest output of each engine
//!
//! All engines are synchronous and single-threaded per call. Reconciliation
//! and promotion take a [`ledger::LedgerSnapshot`] so no fill can land
//! mid-evaluation.

pub mod gvrs;
pub mod ledger;
pub mod promotion;
pub mod reconcile;
pub mod state;

pub use gvrs::{BarOutcome, GateDecision, GvrsSnapshot, VolatilityGate};
pub use ledger::{FillOutcome, LedgerSnapshot, PositionLedger};
pub use promotion::{PromotionRuntime, PromotionShadowSnapshot};
pub use reconcile::{ReconciliationEngine, ReconciliationRecord, ReconciliationReport, ReconciliationSummary};
pub use state::{ConnectionState, EngineSnapshot, EngineState, LoopState};
