//! Price bars consumed by the volatility gate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV bar for a symbol.
///
/// `period_end` is the bar's timestamp for ordering and lookback purposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

impl Bar {
    /// Check the bar is usable: finite prices and `high >= low`.
    pub fn validate(&self) -> Result<(), String> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(format!("{}: non-finite price", self.symbol));
        }
        if self.high < self.low {
            return Err(format!("{}: high {} < low {}", self.symbol, self.high, self.low));
        }
        if self.period_end < self.period_start {
            return Err(format!("{}: period_end before period_start", self.symbol));
        }
        Ok(())
    }
}

impl std::fmt::Display for Bar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Bar({} {} o={} h={} l={} c={})",
            self.symbol,
            crate::time_util::to_iso8601(&self.period_end),
            self.open,
            self.high,
            self.low,
            self.close
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(high: f64, low: f64) -> Bar {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Bar {
            symbol: "EURUSD".into(),
            period_start: t,
            period_end: t + chrono::Duration::minutes(5),
            open: 1.1,
            high,
            low,
            close: 1.1,
            volume: 0.0,
        }
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(bar(1.0, 1.2).validate().is_err());
        assert!(bar(1.2, 1.0).validate().is_ok());
    }

    #[test]
    fn rejects_nan() {
        assert!(bar(f64::NAN, 1.0).validate().is_err());
    }
}
