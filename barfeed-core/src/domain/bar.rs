//! Bar: the canonical market data unit every vendor is normalized into.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// One time-bucketed OHLCV summary.
///
/// `timestamp` is exchange-local wall-clock time with no zone attached. Every
/// provider converts its native representation into this form before a bar
/// leaves the crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub vwap: Option<f64>,
}

impl OhlcvBar {
    pub fn has_nan_price(&self) -> bool {
        [self.open, self.high, self.low, self.close]
            .iter()
            .any(|p| p.is_nan())
    }

    /// Positive prices, with the first and last trade of the interval inside
    /// its traded range.
    pub fn is_sane(&self) -> bool {
        let range = self.low..=self.high;
        !self.has_nan_price()
            && self.low > 0.0
            && range.contains(&self.open)
            && range.contains(&self.close)
    }
}
