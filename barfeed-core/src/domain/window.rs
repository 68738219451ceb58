//! Fetch-window endpoints that may or may not carry a zone.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A window endpoint as handed to a provider.
///
/// Naive values are wall-clock times in some zone the provider decides on
/// (the exchange zone for Alpaca and IB, the host zone for Polygon). Zoned
/// values pin an exact instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowTime {
    Naive(NaiveDateTime),
    Zoned(DateTime<FixedOffset>),
}

impl WindowTime {
    /// Resolve to an instant, reading naive values as wall-clock time in `zone`.
    ///
    /// Ambiguous wall-clock times (DST fall-back) resolve to the earlier
    /// instant. Times inside a spring-forward gap use the offset in force
    /// just before the gap. Returns `None` only if neither rule applies.
    pub fn to_utc<Z: TimeZone>(&self, zone: &Z) -> Option<DateTime<Utc>> {
        match self {
            WindowTime::Zoned(dt) => Some(dt.with_timezone(&Utc)),
            WindowTime::Naive(naive) => zone
                .from_local_datetime(naive)
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .or_else(|| {
                    let before_gap = *naive - Duration::hours(1);
                    zone.from_local_datetime(&before_gap)
                        .earliest()
                        .map(|dt| dt.with_timezone(&Utc) + Duration::hours(1))
                }),
        }
    }

    /// Wall-clock time in `zone`. Naive values are returned untouched.
    pub fn to_naive_in<Z: TimeZone>(&self, zone: &Z) -> NaiveDateTime {
        match self {
            WindowTime::Naive(naive) => *naive,
            WindowTime::Zoned(dt) => dt.with_timezone(zone).naive_local(),
        }
    }
}

impl From<NaiveDateTime> for WindowTime {
    fn from(value: NaiveDateTime) -> Self {
        WindowTime::Naive(value)
    }
}

impl<Z: TimeZone> From<DateTime<Z>> for WindowTime {
    fn from(value: DateTime<Z>) -> Self {
        WindowTime::Zoned(value.fixed_offset())
    }
}

impl fmt::Display for WindowTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowTime::Naive(naive) => write!(f, "{}", naive.format("%Y-%m-%d %H:%M:%S")),
            WindowTime::Zoned(dt) => write!(f, "{}", dt.to_rfc3339()),
        }
    }
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

impl FromStr for WindowTime {
    type Err = String;

    /// Accepts RFC 3339 (zoned), `YYYY-MM-DD[ T]HH:MM[:SS]` or a bare date
    /// (naive, midnight).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(WindowTime::Zoned(dt));
        }
        for fmt in NAIVE_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                return Ok(WindowTime::Naive(naive));
            }
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(WindowTime::Naive)
            .ok_or_else(|| format!("invalid time '{s}': expected RFC 3339 or YYYY-MM-DD[ HH:MM[:SS]]"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;

    fn naive(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    #[test]
    fn naive_resolves_in_given_zone() {
        let t = WindowTime::Naive(naive("2025-06-02 09:30:00"));
        let utc = t.to_utc(&New_York).unwrap();
        assert_eq!(utc.to_rfc3339(), "2025-06-02T13:30:00+00:00");
    }

    #[test]
    fn zoned_ignores_assumed_zone() {
        let t: WindowTime = "2025-06-02T13:30:00Z".parse().unwrap();
        assert_eq!(t.to_utc(&New_York).unwrap().timestamp(), 1_748_871_000);
        assert_eq!(t.to_naive_in(&New_York), naive("2025-06-02 09:30:00"));
    }

    #[test]
    fn ambiguous_fall_back_picks_earlier_instant() {
        // 01:30 happens twice on 2025-11-02 in New York.
        let t = WindowTime::Naive(naive("2025-11-02 01:30:00"));
        let utc = t.to_utc(&New_York).unwrap();
        assert_eq!(utc.to_rfc3339(), "2025-11-02T05:30:00+00:00");
    }

    #[test]
    fn spring_forward_gap_uses_prior_offset() {
        // 02:30 does not exist on 2025-03-09 in New York.
        let t = WindowTime::Naive(naive("2025-03-09 02:30:00"));
        let utc = t.to_utc(&New_York).unwrap();
        assert_eq!(utc.to_rfc3339(), "2025-03-09T07:30:00+00:00");
    }

    #[test]
    fn parses_cli_forms() {
        assert_eq!(
            "2025-06-02 09:30".parse::<WindowTime>().unwrap(),
            WindowTime::Naive(naive("2025-06-02 09:30:00"))
        );
        assert_eq!(
            "2025-06-02".parse::<WindowTime>().unwrap(),
            WindowTime::Naive(naive("2025-06-02 00:00:00"))
        );
        assert!("yesterday".parse::<WindowTime>().is_err());
    }
}
