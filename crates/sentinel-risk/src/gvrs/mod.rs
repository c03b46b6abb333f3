//! Global Volatility Risk Score (GVRS) gate.
//!
//! Turns a stream of price bars into a smoothed, bucketed risk level:
//!
//! ```text
//! Bar ──► SymbolWindow (per symbol) ──► raw score (mean of symbol ranks)
//!                                          │
//!                                          ▼
//!                      ewma_t = α·raw_t + (1−α)·ewma_{t−1}
//!                                          │
//!                                          ▼
//!                            Calm | Moderate | Volatile
//! ```
//!
//! In `shadow` mode a threshold crossing is advisory only. In `live` mode it
//! also counts as a gate block, which upstream order submission honours.
//!
//! When no tracked symbol has enough samples (at start, or after a gap longer
//! than the lookback) the gate is cold: it has no value, `evaluate` fails with
//! [`SentinelError::NotReady`], and the EWMA is reseeded from the next raw
//! score.

pub mod window;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sentinel_core::{
    Bar, GateMode, GvrsBucket, Result, SentinelError, config::VolatilityGateConfig,
    time_util::to_iso8601,
};
use serde::Serialize;
use tracing::{debug, info, warn};

pub use window::{SymbolWindow, VolatilitySample};

/// What `on_bar` did with a bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarOutcome {
    Accepted,
    /// Interval differs from the configured one, or the gate is disabled.
    Ignored,
}

/// Result of one gate evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GateDecision {
    /// Dedup key for the shadow alert register: `gvrs:<last bar ts>`.
    pub decision_id: String,
    pub raw: f64,
    pub ewma: f64,
    pub bucket: GvrsBucket,
    pub mode: GateMode,
    pub should_alert: bool,
    /// `true` when this evaluation recorded a gate block (live mode only).
    pub blocked: bool,
    pub evaluated_at: DateTime<Utc>,
}

/// Current gate state as exposed to reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GvrsSnapshot {
    pub raw: Option<f64>,
    pub ewma: Option<f64>,
    pub bucket: Option<GvrsBucket>,
    pub mode: GateMode,
    pub has_value: bool,
    pub tracked_symbols: usize,
    pub samples: usize,
    pub bars_accepted: u64,
    pub gate_blocks_total: u64,
    pub last_block_at: Option<DateTime<Utc>>,
    pub last_bar_at: Option<DateTime<Utc>>,
    pub config_hash: String,
}

/// Fixed partition of a score into buckets; monotonic in `value`.
pub fn bucket_for(value: f64, config: &VolatilityGateConfig) -> GvrsBucket {
    if value >= config.volatile_threshold {
        GvrsBucket::Volatile
    } else if value >= config.moderate_threshold {
        GvrsBucket::Moderate
    } else {
        GvrsBucket::Calm
    }
}

/// The volatility gate.
///
/// Single-threaded: `on_bar` and `evaluate` run to completion. Bars must
/// arrive in non-decreasing `period_end` order per symbol.
pub struct VolatilityGate {
    config: VolatilityGateConfig,
    /// Ordered so the cross-symbol mean is summed deterministically.
    windows: BTreeMap<String, SymbolWindow>,
    raw: Option<f64>,
    ewma: Option<f64>,
    bucket: Option<GvrsBucket>,
    last_bar_at: Option<DateTime<Utc>>,
    bars_accepted: u64,
    gate_blocks_total: u64,
    last_block_at: Option<DateTime<Utc>>,
}

impl VolatilityGate {
    /// Build a gate; refuses to start on an invalid config.
    pub fn new(config: VolatilityGateConfig) -> Result<Self> {
        config.validate()?;
        info!(
            mode = %config.mode,
            interval = %config.interval,
            alpha = config.ewma_alpha,
            entry = config.entry_threshold,
            config_hash = %config.config_hash,
            "volatility gate initialized"
        );
        Ok(Self {
            config,
            windows: BTreeMap::new(),
            raw: None,
            ewma: None,
            bucket: None,
            last_bar_at: None,
            bars_accepted: 0,
            gate_blocks_total: 0,
            last_block_at: None,
        })
    }

    pub fn config(&self) -> &VolatilityGateConfig {
        &self.config
    }

    pub fn has_value(&self) -> bool {
        self.ewma.is_some()
    }

    /// Feed one bar.
    ///
    /// Bars for other intervals are ignored. Bars for untracked symbols,
    /// malformed bars and bars older than the symbol's last bar are rejected
    /// without touching state.
    pub fn on_bar(&mut self, bar: &Bar, interval: &str) -> Result<BarOutcome> {
        if !self.config.enabled || interval != self.config.interval {
            debug!(symbol = %bar.symbol, interval, "bar ignored");
            return Ok(BarOutcome::Ignored);
        }
        if !self.config.tracks(&bar.symbol) {
            return Err(SentinelError::UnknownSymbol(bar.symbol.clone()));
        }
        bar.validate().map_err(SentinelError::InvalidBar)?;

        if let Some(last) = self.windows.get(&bar.symbol).and_then(|w| w.last_timestamp()) {
            if bar.period_end < last {
                warn!(symbol = %bar.symbol, bar_ts = %to_iso8601(&bar.period_end), "out-of-order bar rejected");
                return Err(SentinelError::OutOfOrderBar {
                    symbol: bar.symbol.clone(),
                    bar_ts: to_iso8601(&bar.period_end),
                    last_ts: to_iso8601(&last),
                });
            }
        }

        let lookback = self.config.lookback();
        let sample = self.windows.entry(bar.symbol.clone()).or_default().push(bar, lookback);
        self.bars_accepted += 1;
        self.last_bar_at = Some(self.last_bar_at.map_or(bar.period_end, |t| t.max(bar.period_end)));

        self.recompute();
        debug!(
            symbol = %bar.symbol,
            true_range = sample.true_range,
            raw = ?self.raw,
            ewma = ?self.ewma,
            "bar accepted"
        );
        Ok(BarOutcome::Accepted)
    }

    fn recompute(&mut self) {
        let min_samples = self.config.min_samples;
        let mut sum = 0.0;
        let mut n = 0usize;
        for w in self.windows.values() {
            if let Some(r) = w.raw_score(min_samples) {
                sum += r;
                n += 1;
            }
        }

        if n == 0 {
            if self.ewma.is_some() {
                warn!("gvrs went cold: no symbol has enough samples");
            }
            self.raw = None;
            self.ewma = None;
            self.bucket = None;
            return;
        }

        let raw = sum / n as f64;
        let alpha = self.config.ewma_alpha;
        let ewma = match self.ewma {
            Some(prev) => alpha * raw + (1.0 - alpha) * prev,
            None => {
                info!(raw, "gvrs has first value");
                raw
            }
        };
        let bucket = bucket_for(ewma, &self.config);
        if self.bucket.is_some_and(|b| b != bucket) {
            info!(from = ?self.bucket, to = %bucket, ewma, "gvrs bucket changed");
        }
        self.raw = Some(raw);
        self.ewma = Some(ewma);
        self.bucket = Some(bucket);
    }

    /// Decide whether the current score alerts, and in live mode, blocks.
    ///
    /// `config` is validated and, when it differs from the active one, adopted
    /// before deciding, so a reloaded policy applies without rebuilding the
    /// windows and the decision always agrees with [`Self::snapshot`]. An
    /// invalid `config` fails with a config error and leaves state untouched.
    pub fn evaluate(&mut self, config: &VolatilityGateConfig, at: DateTime<Utc>) -> Result<GateDecision> {
        config.validate()?;
        if *config != self.config {
            info!(
                mode = %config.mode,
                entry = config.entry_threshold,
                config_hash = %config.config_hash,
                "volatility gate config reloaded"
            );
            self.config = config.clone();
            self.bucket = self.ewma.map(|e| bucket_for(e, &self.config));
        }
        let config = &self.config;

        let (Some(raw), Some(ewma)) = (self.raw, self.ewma) else {
            return Err(SentinelError::NotReady(format!(
                "gvrs needs {} samples in at least one symbol window",
                self.config.min_samples
            )));
        };

        let should_alert = ewma >= config.entry_threshold;
        let blocked = should_alert && config.mode == GateMode::Live;
        let (entry, mode) = (config.entry_threshold, config.mode);
        if blocked {
            self.gate_blocks_total += 1;
            self.last_block_at = Some(at);
            warn!(
                ewma,
                entry,
                blocks = self.gate_blocks_total,
                "gvrs gate block"
            );
        }

        let decision_id = match self.last_bar_at {
            Some(ts) => format!("gvrs:{}", to_iso8601(&ts)),
            None => "gvrs:none".to_string(),
        };
        Ok(GateDecision {
            decision_id,
            raw,
            ewma,
            bucket: bucket_for(ewma, &self.config),
            mode,
            should_alert,
            blocked,
            evaluated_at: at,
        })
    }

    pub fn gate_blocks_total(&self) -> u64 {
        self.gate_blocks_total
    }

    pub fn snapshot(&self) -> GvrsSnapshot {
        GvrsSnapshot {
            raw: self.raw,
            ewma: self.ewma,
            bucket: self.bucket,
            mode: self.config.mode,
            has_value: self.has_value(),
            tracked_symbols: self.windows.len(),
            samples: self.windows.values().map(SymbolWindow::len).sum(),
            bars_accepted: self.bars_accepted,
            gate_blocks_total: self.gate_blocks_total,
            last_block_at: self.last_block_at,
            last_bar_at: self.last_bar_at,
            config_hash: self.config.config_hash.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn config(mode: GateMode) -> VolatilityGateConfig {
        VolatilityGateConfig {
            enabled: true,
            mode,
            interval: "5m".into(),
            symbols: vec!["EURUSD".into(), "GBPUSD".into()],
            lookback_hours: 24,
            min_samples: 3,
            ewma_alpha: 0.3,
            entry_threshold: 0.7,
            moderate_threshold: 0.4,
            volatile_threshold: 0.75,
            alert_ttl_minutes: 60,
            alert_register_capacity: 16,
            config_hash: "h".into(),
        }
    }

    fn bar(symbol: &str, minute: i64, range: f64) -> Bar {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        Bar {
            symbol: symbol.into(),
            period_start: t - Duration::minutes(5),
            period_end: t,
            open: 1.0,
            high: 1.0 + range,
            low: 1.0,
            close: 1.0,
            volume: 0.0,
        }
    }

    #[test]
    fn not_ready_until_min_samples() {
        let mut g = VolatilityGate::new(config(GateMode::Shadow)).unwrap();
        let cfg = g.config().clone();
        g.on_bar(&bar("EURUSD", 0, 0.01), "5m").unwrap();
        g.on_bar(&bar("EURUSD", 5, 0.02), "5m").unwrap();
        assert!(!g.snapshot().has_value);
        assert!(matches!(g.evaluate(&cfg, Utc::now()), Err(SentinelError::NotReady(_))));
        g.on_bar(&bar("EURUSD", 10, 0.03), "5m").unwrap();
        assert!(g.snapshot().has_value);
        assert!(g.evaluate(&cfg, Utc::now()).is_ok());
    }

    #[test]
    fn other_intervals_ignored() {
        let mut g = VolatilityGate::new(config(GateMode::Shadow)).unwrap();
        assert_eq!(g.on_bar(&bar("EURUSD", 0, 0.01), "1h").unwrap(), BarOutcome::Ignored);
        assert_eq!(g.snapshot().bars_accepted, 0);
    }

    #[test]
    fn rejections_leave_state_untouched() {
        let mut g = VolatilityGate::new(config(GateMode::Shadow)).unwrap();
        g.on_bar(&bar("EURUSD", 10, 0.01), "5m").unwrap();
        let before = g.snapshot();

        let err = g.on_bar(&bar("USDJPY", 15, 0.01), "5m").unwrap_err();
        assert!(matches!(err, SentinelError::UnknownSymbol(_)));
        let err = g.on_bar(&bar("EURUSD", 5, 0.01), "5m").unwrap_err();
        assert!(matches!(err, SentinelError::OutOfOrderBar { .. }));
        let mut bad = bar("EURUSD", 20, 0.01);
        bad.low = 2.0;
        assert!(matches!(g.on_bar(&bad, "5m"), Err(SentinelError::InvalidBar(_))));

        assert_eq!(g.snapshot(), before);
    }

    #[test]
    fn live_crossing_blocks_and_counts() {
        let mut g = VolatilityGate::new(config(GateMode::Live)).unwrap();
        let cfg = g.config().clone();
        for (i, r) in [0.01, 0.02, 0.03, 0.04, 0.05].iter().enumerate() {
            g.on_bar(&bar("EURUSD", i as i64 * 5, *r), "5m").unwrap();
        }
        // every bar ranks at the top of its window: raw stays at 1.0
        let at = Utc::now();
        let d = g.evaluate(&cfg, at).unwrap();
        assert!(d.should_alert && d.blocked);
        assert_eq!(d.bucket, GvrsBucket::Volatile);
        g.evaluate(&cfg, at).unwrap();
        assert_eq!(g.gate_blocks_total(), 2);
        assert_eq!(g.snapshot().last_block_at, Some(at));
    }

    #[test]
    fn shadow_crossing_is_advisory() {
        let mut g = VolatilityGate::new(config(GateMode::Shadow)).unwrap();
        let cfg = g.config().clone();
        for (i, r) in [0.01, 0.02, 0.03].iter().enumerate() {
            g.on_bar(&bar("EURUSD", i as i64 * 5, *r), "5m").unwrap();
        }
        let d = g.evaluate(&cfg, Utc::now()).unwrap();
        assert!(d.should_alert);
        assert!(!d.blocked);
        assert_eq!(g.gate_blocks_total(), 0);
        assert_eq!(d.decision_id, "gvrs:2024-01-01T00:10:00.000Z");
    }

    #[test]
    fn reloaded_thresholds_agree_with_snapshot() {
        let mut g = VolatilityGate::new(config(GateMode::Shadow)).unwrap();
        for (i, r) in [0.03, 0.02, 0.01, 0.015].iter().enumerate() {
            g.on_bar(&bar("EURUSD", i as i64 * 5, *r), "5m").unwrap();
        }
        let before = g.snapshot().bucket;

        let mut reloaded = config(GateMode::Live);
        reloaded.moderate_threshold = 0.01;
        reloaded.volatile_threshold = 0.02;
        reloaded.config_hash = "h2".into();
        let d = g.evaluate(&reloaded, Utc::now()).unwrap();
        let snap = g.snapshot();
        assert_eq!(Some(d.bucket), snap.bucket);
        assert_ne!(snap.bucket, before);
        assert_eq!(snap.mode, GateMode::Live);
        assert_eq!(snap.config_hash, "h2");
    }

    #[test]
    fn invalid_reload_is_rejected() {
        let mut g = VolatilityGate::new(config(GateMode::Shadow)).unwrap();
        for (i, r) in [0.01, 0.02, 0.03].iter().enumerate() {
            g.on_bar(&bar("EURUSD", i as i64 * 5, *r), "5m").unwrap();
        }
        let before = g.snapshot();
        let mut bad = config(GateMode::Live);
        bad.ewma_alpha = 0.0;
        assert!(matches!(g.evaluate(&bad, Utc::now()), Err(SentinelError::Config(_))));
        assert_eq!(g.snapshot(), before);
        assert_eq!(g.config().mode, GateMode::Shadow);
    }

    #[test]
    fn global_raw_is_mean_of_symbols() {
        let mut g = VolatilityGate::new(config(GateMode::Shadow)).unwrap();
        for (i, r) in [0.01, 0.02, 0.03].iter().enumerate() {
            g.on_bar(&bar("EURUSD", i as i64 * 5, *r), "5m").unwrap();
        }
        for (i, r) in [0.03, 0.02, 0.01].iter().enumerate() {
            g.on_bar(&bar("GBPUSD", i as i64 * 5, *r), "5m").unwrap();
        }
        // EURUSD ranks 1.0, GBPUSD ranks 0.0
        assert_eq!(g.snapshot().raw, Some(0.5));
    }

    #[test]
    fn bucket_is_monotonic() {
        let cfg = config(GateMode::Shadow);
        let mut prev = GvrsBucket::Calm;
        for i in 0..=100 {
            let b = bucket_for(i as f64 / 100.0, &cfg);
            assert!(b >= prev);
            prev = b;
        }
        assert_eq!(bucket_for(0.4, &cfg), GvrsBucket::Moderate);
        assert_eq!(bucket_for(0.3999, &cfg), GvrsBucket::Calm);
    }

    #[test]
    fn gap_longer_than_lookback_goes_cold() {
        let mut cfg = config(GateMode::Shadow);
        cfg.lookback_hours = 1;
        let mut g = VolatilityGate::new(cfg).unwrap();
        for (i, r) in [0.01, 0.02, 0.03].iter().enumerate() {
            g.on_bar(&bar("EURUSD", i as i64 * 5, *r), "5m").unwrap();
        }
        assert!(g.has_value());
        g.on_bar(&bar("EURUSD", 600, 0.01), "5m").unwrap();
        assert!(!g.has_value());
    }
}
