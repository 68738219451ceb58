//! Bar granularity and its per-vendor spellings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Width of one bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Minute,
    Hour,
    Day,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
        }
    }

    /// Alpaca `timeframe` query value.
    pub fn alpaca_timeframe(&self) -> &'static str {
        match self {
            Granularity::Minute => "1Min",
            Granularity::Hour => "1Hour",
            Granularity::Day => "1Day",
        }
    }

    /// Polygon aggregate `timespan` path segment.
    pub fn polygon_timespan(&self) -> &'static str {
        self.as_str()
    }

    /// IB `barSizeSetting`.
    pub fn ib_bar_size(&self) -> &'static str {
        match self {
            Granularity::Minute => "1 min",
            Granularity::Hour => "1 hour",
            Granularity::Day => "1 day",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minute" | "min" | "1m" | "1min" => Ok(Granularity::Minute),
            "hour" | "1h" | "1hour" => Ok(Granularity::Hour),
            "day" | "1d" | "1day" => Ok(Granularity::Day),
            other => Err(format!(
                "invalid granularity '{other}'. expected one of: minute | hour | day"
            )),
        }
    }
}
