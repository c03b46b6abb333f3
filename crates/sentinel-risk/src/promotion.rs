//! Shadow strategy promotion runtime.
//!
//! Decides from realized outcomes whether a paper-traded candidate has earned
//! live capital (promotion) or should be pulled back (demotion):
//!
//! 1. Select closed trades whose symbol or strategy id is a configured
//!    candidate and that closed inside `(evaluation − probation, evaluation]`.
//! 2. Fewer than `min_trades` such trades: no decision, counters unchanged.
//! 3. Otherwise `win_ratio = wins / trades` (a win is a strictly positive
//!    realized P&L) and
//!    - `win_ratio >= promotion_threshold` → promoted
//!    - `win_ratio <= demotion_threshold` → demoted
//!    - strictly between → hold
//!
//! Both bounds are closed. When the two thresholds coincide and the ratio
//! sits exactly on them, promotion takes precedence so a call never counts
//! both.
//!
//! The decision is rolling: it is recomputed from the ledger on every call.
//! Re-evaluating an unchanged window repeats the previous decision without
//! counting it again. A window is unchanged when its trade count, wins and
//! oldest and newest attributed trades all match the previous call, so a
//! window that rolled onto different trades with the same counts is a new
//! decision.

use chrono::{DateTime, Utc};
use sentinel_core::{ClosedTrade, PromotionDecision, Result, config::PromotionConfig};
use serde::Serialize;
use tracing::{debug, info};

use crate::ledger::LedgerSnapshot;

/// Shadow performance as exposed to reporting (`promotion` in health JSON).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromotionShadowSnapshot {
    pub enabled: bool,
    pub decision: PromotionDecision,
    pub promotions_total: u64,
    pub demotions_total: u64,
    pub trade_count: usize,
    pub wins: usize,
    pub losses: usize,
    /// `wins / trade_count`; `None` when there are no trades.
    pub win_ratio: Option<f64>,
    pub min_trades: usize,
    pub promotion_threshold: f64,
    pub demotion_threshold: f64,
    pub probation_days: u32,
    pub candidates: Vec<String>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub config_hash: String,
}

/// Promotion/demotion lifecycle for shadow candidates.
pub struct PromotionRuntime {
    config: PromotionConfig,
    promotions_total: u64,
    demotions_total: u64,
    /// Tally of the last call that reached a ratio.
    last_tally: Option<Tally>,
}

/// Identity of an attributed window: counts plus its edge trades.
#[derive(Debug, Clone, Default, PartialEq)]
struct Tally {
    trades: usize,
    wins: usize,
    /// `(decision_id, closed_at)` of the earliest attributed trade.
    oldest: Option<(String, DateTime<Utc>)>,
    newest: Option<(String, DateTime<Utc>)>,
}

impl Tally {
    fn add(&mut self, trade: &ClosedTrade) {
        self.trades += 1;
        if trade.is_win() {
            self.wins += 1;
        }
        let edge = || Some((trade.decision_id.clone(), trade.closed_at));
        if self.oldest.as_ref().is_none_or(|(_, at)| trade.closed_at < *at) {
            self.oldest = edge();
        }
        if self.newest.as_ref().is_none_or(|(_, at)| trade.closed_at >= *at) {
            self.newest = edge();
        }
    }
}

impl PromotionRuntime {
    /// Build a runtime; fails with a config error on inverted or
    /// out-of-range thresholds.
    pub fn new(config: PromotionConfig) -> Result<Self> {
        config.validate()?;
        info!(
            candidates = config.candidates.len(),
            probation_days = config.probation_days,
            min_trades = config.min_trades,
            promote = config.promotion_threshold,
            demote = config.demotion_threshold,
            config_hash = %config.config_hash,
            "promotion runtime initialized"
        );
        Ok(Self { config, promotions_total: 0, demotions_total: 0, last_tally: None })
    }

    pub fn config(&self) -> &PromotionConfig {
        &self.config
    }

    pub fn promotions_total(&self) -> u64 {
        self.promotions_total
    }

    pub fn demotions_total(&self) -> u64 {
        self.demotions_total
    }

    /// Evaluate candidates against the probation window ending at
    /// `evaluation_utc`.
    ///
    /// Never fails: an empty or thin trade history is an
    /// `InsufficientSample` decision, not an error.
    pub fn evaluate(&mut self, ledger: &LedgerSnapshot, evaluation_utc: DateTime<Utc>) -> PromotionShadowSnapshot {
        let window_start = evaluation_utc
            .checked_sub_signed(self.config.probation_window())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let mut tally = Tally::default();
        for t in &ledger.closed_trades {
            let in_window = t.closed_at > window_start && t.closed_at <= evaluation_utc;
            if in_window && self.config.is_candidate(&t.symbol, t.strategy_id.as_deref()) {
                tally.add(t);
            }
        }
        let (trade_count, wins) = (tally.trades, tally.wins);
        let win_ratio = (trade_count > 0).then(|| wins as f64 / trade_count as f64);

        let decision = if !self.config.enabled {
            PromotionDecision::Disabled
        } else if trade_count < self.config.min_trades || win_ratio.is_none() {
            self.last_tally = None;
            PromotionDecision::InsufficientSample
        } else {
            let ratio = win_ratio.unwrap_or_default();
            let decision = if ratio >= self.config.promotion_threshold {
                PromotionDecision::Promoted
            } else if ratio <= self.config.demotion_threshold {
                PromotionDecision::Demoted
            } else {
                PromotionDecision::Hold
            };

            if self.last_tally.as_ref() != Some(&tally) {
                self.last_tally = Some(tally);
                match decision {
                    PromotionDecision::Promoted => {
                        self.promotions_total += 1;
                        info!(trade_count, wins, ratio, total = self.promotions_total, "shadow candidate promoted");
                    }
                    PromotionDecision::Demoted => {
                        self.demotions_total += 1;
                        info!(trade_count, wins, ratio, total = self.demotions_total, "shadow candidate demoted");
                    }
                    _ => {}
                }
            }
            decision
        };

        debug!(?decision, trade_count, wins, "promotion evaluated");
        PromotionShadowSnapshot {
            enabled: self.config.enabled,
            decision,
            promotions_total: self.promotions_total,
            demotions_total: self.demotions_total,
            trade_count,
            wins,
            losses: trade_count - wins,
            win_ratio,
            min_trades: self.config.min_trades,
            promotion_threshold: self.config.promotion_threshold,
            demotion_threshold: self.config.demotion_threshold,
            probation_days: self.config.probation_days,
            candidates: self.config.candidates.iter().cloned().collect(),
            window_start,
            window_end: evaluation_utc,
            config_hash: self.config.config_hash.clone(),
        }
    }
}
