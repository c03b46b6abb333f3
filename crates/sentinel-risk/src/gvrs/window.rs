//! Per-symbol rolling window of true ranges.
//!
//! Each accepted bar contributes one [`VolatilitySample`]. Samples older than
//! the lookback (measured from the newest bar) are dropped, and the window is
//! additionally capped at [`MAX_SAMPLES`].
//!
//! The raw score is the percentile rank of the newest true range against the
//! rest of the window, using the mid-rank convention: samples strictly below
//! count fully, ties count half. The result is in `[0, 1]`.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use sentinel_core::Bar;
use serde::Serialize;

/// Hard cap on samples per symbol regardless of lookback.
pub const MAX_SAMPLES: usize = 8192;

/// One bar's contribution to the window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolatilitySample {
    pub timestamp: DateTime<Utc>,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub true_range: f64,
}

/// Rolling window for one symbol.
#[derive(Debug, Clone, Default)]
pub struct SymbolWindow {
    samples: VecDeque<VolatilitySample>,
    last_close: Option<f64>,
    last_ts: Option<DateTime<Utc>>,
}

impl SymbolWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamp of the newest accepted bar.
    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.last_ts
    }

    /// Append a bar and drop samples that fell out of the lookback.
    ///
    /// The caller is responsible for ordering; see `VolatilityGate::on_bar`.
    pub fn push(&mut self, bar: &Bar, lookback: Duration) -> VolatilitySample {
        let true_range = true_range(bar.high, bar.low, self.last_close);
        let sample = VolatilitySample {
            timestamp: bar.period_end,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            true_range,
        };
        self.samples.push_back(sample);
        self.last_close = Some(bar.close);
        self.last_ts = Some(bar.period_end);

        if let Some(cutoff) = bar.period_end.checked_sub_signed(lookback) {
            while self.samples.front().is_some_and(|s| s.timestamp <= cutoff) {
                self.samples.pop_front();
            }
        }
        while self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }
        sample
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Average true range over the window.
    pub fn atr(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|s| s.true_range).sum();
        Some(sum / self.samples.len() as f64)
    }

    /// Percentile rank of the newest true range, once `min_samples` exist.
    pub fn raw_score(&self, min_samples: usize) -> Option<f64> {
        if self.samples.len() < min_samples.max(2) {
            return None;
        }
        let latest = self.samples.back()?.true_range;
        let history = self.samples.len() - 1;
        let mut below = 0usize;
        let mut ties = 0usize;
        for s in self.samples.iter().take(history) {
            if s.true_range < latest {
                below += 1;
            } else if s.true_range == latest {
                ties += 1;
            }
        }
        Some((below as f64 + 0.5 * ties as f64) / history as f64)
    }
}

/// `max(h - l, |h - prev_close|, |l - prev_close|)`; `h - l` for the first bar.
pub fn true_range(high: f64, low: f64, prev_close: Option<f64>) -> f64 {
    let range = high - low;
    match prev_close {
        Some(pc) => range.max((high - pc).abs()).max((low - pc).abs()),
        None => range,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use chrono::TimeZone;

    fn bar(minute: i64, high: f64, low: f64, close: f64) -> Bar {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        Bar {
            symbol: "EURUSD".into(),
            period_start: t - Duration::minutes(5),
            period_end: t,
            open: close,
            high,
            low,
            close,
            volume: 0.0,
        }
    }

    #[test]
    fn true_range_uses_previous_close() {
        assert_eq!(true_range(1.2, 1.1, None), 1.2 - 1.1);
        // gap up: previous close far below the bar's low
        assert_abs_diff_eq!(true_range(1.2, 1.15, Some(1.0)), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn raw_score_needs_min_samples() {
        let mut w = SymbolWindow::new();
        w.push(&bar(0, 1.2, 1.0, 1.1), Duration::hours(1));
        assert_eq!(w.raw_score(2), None);
        w.push(&bar(5, 1.2, 1.0, 1.1), Duration::hours(1));
        assert_eq!(w.raw_score(3), None);
        assert_eq!(w.raw_score(2), Some(0.5)); // tie
    }

    #[test]
    fn raw_score_ranks_latest() {
        let mut w = SymbolWindow::new();
        for (i, range) in [0.01, 0.02, 0.03, 0.04].iter().enumerate() {
            w.push(&bar(i as i64 * 5, 1.0 + range, 1.0, 1.0), Duration::hours(1));
        }
        assert_eq!(w.raw_score(2), Some(1.0));
        w.push(&bar(20, 1.005, 1.0, 1.0), Duration::hours(1));
        assert_eq!(w.raw_score(2), Some(0.0));
    }

    #[test]
    fn huge_lookback_near_epoch_floor_keeps_samples() {
        let mut w = SymbolWindow::new();
        let mut b = bar(0, 1.2, 1.0, 1.1);
        b.period_end = DateTime::<Utc>::MIN_UTC + Duration::hours(1);
        b.period_start = b.period_end;
        w.push(&b, Duration::days(365));
        w.push(&b, Duration::days(365));
        assert_eq!(w.len(), 2);
    }

    #[test]
    fn lookback_evicts_old_samples() {
        let mut w = SymbolWindow::new();
        w.push(&bar(0, 1.2, 1.0, 1.1), Duration::minutes(10));
        w.push(&bar(5, 1.2, 1.0, 1.1), Duration::minutes(10));
        w.push(&bar(10, 1.2, 1.0, 1.1), Duration::minutes(10));
        assert_eq!(w.len(), 2);
        assert!(w.atr().unwrap() > 0.0);
    }
}
