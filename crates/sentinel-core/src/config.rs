//! Risk configuration model.
//!
//! The engines read their policy from a single JSON document with three
//! optional sections. The schema is strict: unknown keys, out-of-range
//! thresholds and inverted bounds are rejected at load time so that no
//! subsystem ever runs with undefined policy.
//!
//! # Example config
//!
//! ```json
//! {
//!   "global_volatility_gate": {
//!     "mode": "shadow", "interval": "5m", "symbols": ["EURUSD"],
//!     "lookback_hours": 24, "min_samples": 20, "ewma_alpha": 0.3,
//!     "entry_threshold": 0.8, "moderate_threshold": 0.4, "volatile_threshold": 0.75
//!   },
//!   "promotion": {
//!     "candidates": ["mean_revert_v2"], "probation_days": 14, "min_trades": 30,
//!     "promotion_threshold": 0.6, "demotion_threshold": 0.4
//!   },
//!   "news_blackout": {
//!     "pre_minutes": 15, "post_minutes": 30,
//!     "events": [{ "name": "NFP", "at": "2024-03-08T13:30:00Z", "symbols": ["EURUSD"] }]
//!   }
//! }
//! ```
//!
//! Every section carries a SHA-256 content hash of its canonical JSON, and the
//! document as a whole carries the hash of the raw file contents. Hashes are
//! echoed into snapshots and log lines for audit.

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{Result, SentinelError};
use crate::types::GateMode;

/// Top-level risk configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskConfig {
    #[serde(default)]
    pub global_volatility_gate: Option<VolatilityGateConfig>,

    #[serde(default)]
    pub promotion: Option<PromotionConfig>,

    #[serde(default)]
    pub news_blackout: Option<NewsBlackoutConfig>,

    /// SHA-256 of the raw document.
    #[serde(skip)]
    pub config_hash: String,
}

impl RiskConfig {
    /// Parse, validate and hash a JSON document.
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: RiskConfig = serde_json::from_str(content)
            .map_err(|e| SentinelError::config(format!("malformed risk config: {e}")))?;
        config.config_hash = sha256_hex(content.as_bytes());

        if let Some(gate) = config.global_volatility_gate.as_mut() {
            gate.validate()?;
            gate.config_hash = section_hash(gate)?;
        }
        if let Some(promo) = config.promotion.as_mut() {
            promo.validate()?;
            promo.config_hash = section_hash(promo)?;
        }
        if let Some(news) = config.news_blackout.as_mut() {
            news.validate()?;
            news.config_hash = section_hash(news)?;
        }
        Ok(config)
    }

    /// The volatility gate section, or a config error if it is absent.
    pub fn require_volatility_gate(&self) -> Result<&VolatilityGateConfig> {
        self.global_volatility_gate
            .as_ref()
            .ok_or_else(|| SentinelError::config("global_volatility_gate section missing"))
    }

    /// The promotion section, or a config error if it is absent.
    pub fn require_promotion(&self) -> Result<&PromotionConfig> {
        self.promotion.as_ref().ok_or_else(|| SentinelError::config("promotion section missing"))
    }
}

// ---------------------------------------------------------------------------
// Volatility gate
// ---------------------------------------------------------------------------

/// Longest accepted volatility lookback (one leap year).
pub const MAX_LOOKBACK_HOURS: u32 = 366 * 24;

/// Longest accepted shadow alert TTL (one leap year).
pub const MAX_ALERT_TTL_MINUTES: u64 = 366 * 24 * 60;

/// Longest accepted promotion probation window (ten years).
pub const MAX_PROBATION_DAYS: u32 = 3660;

/// Longest accepted padding on either side of a news event (one week).
pub const MAX_BLACKOUT_MINUTES: u32 = 7 * 24 * 60;

fn default_true() -> bool {
    true
}

fn default_min_samples() -> usize {
    20
}

fn default_alert_ttl_minutes() -> u64 {
    24 * 60
}

fn default_alert_capacity() -> usize {
    4096
}

/// Global volatility gate (GVRS) policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VolatilityGateConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub mode: GateMode,

    /// Bar interval the gate listens to (e.g. `"5m"`); other intervals are ignored.
    pub interval: String,

    /// Symbols to track. Empty means every symbol is tracked.
    #[serde(default)]
    pub symbols: Vec<String>,

    /// Rolling window length.
    pub lookback_hours: u32,

    /// Samples required in a symbol's window before it yields a raw score.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// EWMA smoothing factor in (0, 1].
    pub ewma_alpha: f64,

    /// EWMA level at or above which the gate alerts (and blocks in live mode).
    pub entry_threshold: f64,

    /// Lower bound of the moderate bucket.
    pub moderate_threshold: f64,

    /// Lower bound of the volatile bucket.
    pub volatile_threshold: f64,

    /// How long a registered shadow alert suppresses repeats.
    #[serde(default = "default_alert_ttl_minutes")]
    pub alert_ttl_minutes: u64,

    /// Upper bound on remembered alert ids.
    #[serde(default = "default_alert_capacity")]
    pub alert_register_capacity: usize,

    #[serde(skip)]
    pub config_hash: String,
}

impl VolatilityGateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.interval.trim().is_empty() {
            return Err(SentinelError::config("volatility gate: interval must not be empty"));
        }
        if self.lookback_hours == 0 || self.lookback_hours > MAX_LOOKBACK_HOURS {
            return Err(SentinelError::config(format!(
                "volatility gate: lookback_hours must be in 1..={MAX_LOOKBACK_HOURS}, got {}",
                self.lookback_hours
            )));
        }
        if self.min_samples < 2 {
            return Err(SentinelError::config(format!(
                "volatility gate: min_samples must be >= 2, got {}",
                self.min_samples
            )));
        }
        if !(self.ewma_alpha > 0.0 && self.ewma_alpha <= 1.0) {
            return Err(SentinelError::config(format!(
                "volatility gate: ewma_alpha must be in (0, 1], got {}",
                self.ewma_alpha
            )));
        }
        check_unit_interval("volatility gate: entry_threshold", self.entry_threshold)?;
        check_unit_interval("volatility gate: moderate_threshold", self.moderate_threshold)?;
        check_unit_interval("volatility gate: volatile_threshold", self.volatile_threshold)?;
        if self.moderate_threshold > self.volatile_threshold {
            return Err(SentinelError::config(format!(
                "volatility gate: moderate_threshold {} > volatile_threshold {}",
                self.moderate_threshold, self.volatile_threshold
            )));
        }
        if self.alert_ttl_minutes == 0 || self.alert_ttl_minutes > MAX_ALERT_TTL_MINUTES {
            return Err(SentinelError::config(format!(
                "volatility gate: alert_ttl_minutes must be in 1..={MAX_ALERT_TTL_MINUTES}, got {}",
                self.alert_ttl_minutes
            )));
        }
        if self.alert_register_capacity == 0 {
            return Err(SentinelError::config("volatility gate: alert_register_capacity must be > 0"));
        }
        Ok(())
    }

    /// Clamped to [`MAX_LOOKBACK_HOURS`] so an unvalidated config cannot overflow.
    pub fn lookback(&self) -> Duration {
        Duration::hours(i64::from(self.lookback_hours.min(MAX_LOOKBACK_HOURS)))
    }

    /// Clamped to [`MAX_ALERT_TTL_MINUTES`].
    pub fn alert_ttl(&self) -> Duration {
        let minutes = i64::try_from(self.alert_ttl_minutes.min(MAX_ALERT_TTL_MINUTES)).unwrap_or_default();
        Duration::minutes(minutes)
    }

    /// Whether bars for `symbol` are accepted.
    pub fn tracks(&self, symbol: &str) -> bool {
        self.symbols.is_empty() || self.symbols.iter().any(|s| s == symbol)
    }
}

// ---------------------------------------------------------------------------
// Promotion
// ---------------------------------------------------------------------------

/// Shadow strategy promotion/demotion policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PromotionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Symbol or strategy ids whose closed trades are evaluated.
    #[serde(default)]
    pub candidates: BTreeSet<String>,

    pub probation_days: u32,

    pub min_trades: usize,

    pub promotion_threshold: f64,

    pub demotion_threshold: f64,

    #[serde(skip)]
    pub config_hash: String,
}

impl PromotionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.probation_days == 0 || self.probation_days > MAX_PROBATION_DAYS {
            return Err(SentinelError::config(format!(
                "promotion: probation_days must be in 1..={MAX_PROBATION_DAYS}, got {}",
                self.probation_days
            )));
        }
        check_unit_interval("promotion: promotion_threshold", self.promotion_threshold)?;
        check_unit_interval("promotion: demotion_threshold", self.demotion_threshold)?;
        if self.promotion_threshold < self.demotion_threshold {
            return Err(SentinelError::config(format!(
                "promotion: promotion_threshold {} < demotion_threshold {}",
                self.promotion_threshold, self.demotion_threshold
            )));
        }
        Ok(())
    }

    /// Clamped to [`MAX_PROBATION_DAYS`].
    pub fn probation_window(&self) -> Duration {
        Duration::days(i64::from(self.probation_days.min(MAX_PROBATION_DAYS)))
    }

    /// A trade is attributable when its symbol or strategy id is a candidate.
    pub fn is_candidate(&self, symbol: &str, strategy_id: Option<&str>) -> bool {
        self.candidates.contains(symbol) || strategy_id.is_some_and(|s| self.candidates.contains(s))
    }
}

// ---------------------------------------------------------------------------
// News blackout
// ---------------------------------------------------------------------------

/// A scheduled news release.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewsEvent {
    pub name: String,
    pub at: DateTime<Utc>,
    /// Affected symbols. Empty means all symbols.
    #[serde(default)]
    pub symbols: Vec<String>,
}

/// Trading blackout windows around scheduled news.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewsBlackoutConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub pre_minutes: u32,

    #[serde(default)]
    pub post_minutes: u32,

    #[serde(default)]
    pub events: Vec<NewsEvent>,

    #[serde(skip)]
    pub config_hash: String,
}

impl NewsBlackoutConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pre_minutes > MAX_BLACKOUT_MINUTES || self.post_minutes > MAX_BLACKOUT_MINUTES {
            return Err(SentinelError::config(format!(
                "news blackout: pre_minutes and post_minutes must be <= {MAX_BLACKOUT_MINUTES}"
            )));
        }
        if let Some(ev) = self.events.iter().find(|e| e.name.trim().is_empty()) {
            return Err(SentinelError::config(format!(
                "news blackout: event at {} has no name",
                ev.at
            )));
        }
        Ok(())
    }

    /// The event whose padded window `[at - pre, at + post]` contains `now`.
    pub fn active_event(&self, symbol: &str, now: DateTime<Utc>) -> Option<&NewsEvent> {
        if !self.enabled {
            return None;
        }
        let pre = Duration::minutes(i64::from(self.pre_minutes.min(MAX_BLACKOUT_MINUTES)));
        let post = Duration::minutes(i64::from(self.post_minutes.min(MAX_BLACKOUT_MINUTES)));
        self.events.iter().find(|ev| {
            let affects = ev.symbols.is_empty() || ev.symbols.iter().any(|s| s == symbol);
            let start = ev.at.checked_sub_signed(pre).unwrap_or(DateTime::<Utc>::MIN_UTC);
            let end = ev.at.checked_add_signed(post).unwrap_or(DateTime::<Utc>::MAX_UTC);
            affects && now >= start && now <= end
        })
    }
}

// ---------------------------------------------------------------------------
// Hashing and loading
// ---------------------------------------------------------------------------

fn check_unit_interval(name: &str, v: f64) -> Result<()> {
    if v.is_finite() && (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(SentinelError::config(format!("{name} must be in [0, 1], got {v}")))
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// SHA-256 of a section's canonical JSON (hash fields are skipped).
pub fn section_hash<T: Serialize>(section: &T) -> Result<String> {
    let canonical = serde_json::to_vec(section)
        .map_err(|e| SentinelError::config(format!("cannot hash config section: {e}")))?;
    Ok(sha256_hex(&canonical))
}

/// Load, validate and hash a JSON risk config file.
pub fn load_config(path: &Path) -> anyhow::Result<RiskConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read risk config {}", path.display()))?;
    let config = RiskConfig::parse(&content)?;
    debug!(path = %path.display(), config_hash = %config.config_hash, "risk config parsed");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const FULL: &str = r#"{
        "global_volatility_gate": {
            "mode": "live", "interval": "5m", "symbols": ["EURUSD"],
            "lookback_hours": 24, "min_samples": 5, "ewma_alpha": 0.3,
            "entry_threshold": 0.8, "moderate_threshold": 0.4, "volatile_threshold": 0.75
        },
        "promotion": {
            "candidates": ["EURUSD", "mr_v2"], "probation_days": 14, "min_trades": 30,
            "promotion_threshold": 0.6, "demotion_threshold": 0.4
        },
        "news_blackout": {
            "pre_minutes": 15, "post_minutes": 30,
            "events": [{ "name": "NFP", "at": "2024-03-08T13:30:00Z", "symbols": ["EURUSD"] }]
        }
    }"#;

    #[test]
    fn parses_all_sections_with_hashes() {
        let cfg = RiskConfig::parse(FULL).unwrap();
        let gate = cfg.require_volatility_gate().unwrap();
        assert_eq!(gate.mode, GateMode::Live);
        assert_eq!(gate.alert_ttl_minutes, 24 * 60);
        assert_eq!(cfg.config_hash.len(), 64);
        assert_eq!(gate.config_hash.len(), 64);
        assert_ne!(gate.config_hash, cfg.require_promotion().unwrap().config_hash);
    }

    #[test]
    fn hashes_are_stable() {
        let a = RiskConfig::parse(FULL).unwrap();
        let b = RiskConfig::parse(FULL).unwrap();
        assert_eq!(a.config_hash, b.config_hash);
        assert_eq!(a.promotion.unwrap().config_hash, b.promotion.unwrap().config_hash);
    }

    #[test]
    fn sections_are_optional() {
        let cfg = RiskConfig::parse("{}").unwrap();
        assert!(cfg.global_volatility_gate.is_none());
        assert!(matches!(cfg.require_promotion(), Err(SentinelError::Config(_))));
    }

    #[test]
    fn unknown_keys_rejected() {
        let err = RiskConfig::parse(r#"{ "promotoin": {} }"#).unwrap_err();
        assert!(matches!(err, SentinelError::Config(_)));
    }

    #[test]
    fn inverted_promotion_bounds_rejected() {
        let doc = r#"{ "promotion": {
            "probation_days": 7, "min_trades": 10,
            "promotion_threshold": 0.4, "demotion_threshold": 0.6 } }"#;
        let err = RiskConfig::parse(doc).unwrap_err();
        assert!(err.to_string().contains("promotion_threshold 0.4 < demotion_threshold 0.6"));
    }

    #[test]
    fn equal_promotion_bounds_allowed() {
        let doc = r#"{ "promotion": {
            "probation_days": 7, "min_trades": 10,
            "promotion_threshold": 0.5, "demotion_threshold": 0.5 } }"#;
        assert!(RiskConfig::parse(doc).is_ok());
    }

    #[test]
    fn bad_alpha_rejected() {
        let doc = FULL.replace("\"ewma_alpha\": 0.3", "\"ewma_alpha\": 0.0");
        assert!(RiskConfig::parse(&doc).is_err());
    }

    #[test]
    fn inverted_buckets_rejected() {
        let doc = FULL.replace("\"moderate_threshold\": 0.4", "\"moderate_threshold\": 0.9");
        assert!(RiskConfig::parse(&doc).is_err());
    }

    #[test]
    fn out_of_range_durations_rejected() {
        let cases = [
            FULL.replace("\"lookback_hours\": 24", "\"lookback_hours\": 4000000000"),
            FULL.replace("\"ewma_alpha\": 0.3", "\"ewma_alpha\": 0.3, \"alert_ttl_minutes\": 18446744073709551615"),
            FULL.replace("\"probation_days\": 14", "\"probation_days\": 200000000"),
            FULL.replace("\"post_minutes\": 30", "\"post_minutes\": 4000000000"),
        ];
        for doc in &cases {
            assert!(matches!(RiskConfig::parse(doc), Err(SentinelError::Config(_))), "{doc}");
        }
    }

    #[test]
    fn duration_bounds_are_inclusive() {
        let doc = FULL
            .replace("\"lookback_hours\": 24", &format!("\"lookback_hours\": {MAX_LOOKBACK_HOURS}"))
            .replace("\"probation_days\": 14", &format!("\"probation_days\": {MAX_PROBATION_DAYS}"));
        let cfg = RiskConfig::parse(&doc).unwrap();
        assert_eq!(cfg.require_volatility_gate().unwrap().lookback(), Duration::hours(366 * 24));
        assert_eq!(cfg.require_promotion().unwrap().probation_window(), Duration::days(3660));
    }

    #[test]
    fn unvalidated_ttl_is_clamped_not_wrapped() {
        let mut gate = RiskConfig::parse(FULL).unwrap().global_volatility_gate.unwrap();
        gate.alert_ttl_minutes = u64::MAX;
        assert!(gate.alert_ttl() > Duration::zero());
        assert_eq!(gate.alert_ttl(), Duration::minutes(MAX_ALERT_TTL_MINUTES as i64));
    }

    #[test]
    fn candidate_matching() {
        let cfg = RiskConfig::parse(FULL).unwrap();
        let promo = cfg.promotion.unwrap();
        assert!(promo.is_candidate("EURUSD", None));
        assert!(promo.is_candidate("GBPUSD", Some("mr_v2")));
        assert!(!promo.is_candidate("GBPUSD", Some("other")));
    }

    #[test]
    fn load_config_reads_file() {
        let path = std::env::temp_dir().join(format!("sentinel-risk-{}.json", std::process::id()));
        std::fs::write(&path, FULL).unwrap();
        let cfg = load_config(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(cfg.config_hash, RiskConfig::parse(FULL).unwrap().config_hash);
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn news_blackout_window() {
        let cfg = RiskConfig::parse(FULL).unwrap();
        let news = cfg.news_blackout.unwrap();
        let at = Utc.with_ymd_and_hms(2024, 3, 8, 13, 30, 0).unwrap();
        assert!(news.active_event("EURUSD", at - Duration::minutes(15)).is_some());
        assert!(news.active_event("EURUSD", at + Duration::minutes(31)).is_none());
        assert!(news.active_event("USDJPY", at).is_none());
    }
}
