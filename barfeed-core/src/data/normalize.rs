//! Bar normalizer: vendor timestamps to canonical naive exchange time, and
//! fetched sequences to strictly ascending, duplicate-free order.
//!
//! Each vendor has its own timestamp convention:
//! - Alpaca sends RFC 3339 UTC; converted to the exchange zone, then stripped.
//! - Polygon sends epoch milliseconds; converted straight to naive time in the
//!   host process zone with no exchange-zone step.
//! - IB reports intraday bars as instants, moved into the exchange zone, and
//!   daily bars as session dates, kept at midnight.

use crate::domain::{OhlcvBar, WindowTime};
use chrono::{DateTime, Local, NaiveDateTime, NaiveTime, Utc};
use chrono_tz::Tz;

/// Zone the host process clock runs in.
///
/// Polygon timestamps are rendered in this zone rather than the exchange
/// zone, so the canonical value only matches the other vendors when the host
/// runs on exchange time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostZone {
    #[default]
    System,
    Fixed(Tz),
}

impl HostZone {
    pub fn naive_from_utc(&self, at: DateTime<Utc>) -> NaiveDateTime {
        match self {
            HostZone::System => at.with_timezone(&Local).naive_local(),
            HostZone::Fixed(tz) => at.with_timezone(tz).naive_local(),
        }
    }

    pub fn resolve(&self, t: &WindowTime) -> Option<DateTime<Utc>> {
        match self {
            HostZone::System => t.to_utc(&Local),
            HostZone::Fixed(tz) => t.to_utc(tz),
        }
    }
}

/// Alpaca `t` field to exchange wall-clock time.
///
/// Strings with an offset are moved into `exchange` and stripped. Strings
/// without one are taken as already naive and kept unchanged.
pub fn alpaca_timestamp(raw: &str, exchange: &Tz) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(exchange).naive_local());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

/// Polygon `t` field (epoch milliseconds) to naive host-zone time.
pub fn polygon_timestamp(epoch_ms: i64, host: &HostZone) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(epoch_ms).map(|utc| host.naive_from_utc(utc))
}

/// IB bar time to exchange wall-clock time.
///
/// Daily bars carry only a session date, surfaced by the API as midnight UTC;
/// that date is kept rather than shifted into the previous evening.
pub fn ib_timestamp(at: DateTime<Utc>, daily: bool, exchange: &Tz) -> NaiveDateTime {
    if daily {
        at.date_naive().and_time(NaiveTime::default())
    } else {
        at.with_timezone(exchange).naive_local()
    }
}

/// Vendor volume to a non-negative integer share count.
pub fn volume(raw: f64) -> u64 {
    if raw.is_finite() && raw > 0.0 {
        raw.round() as u64
    } else {
        0
    }
}

/// Sort ascending by timestamp and drop repeated timestamps, keeping the
/// first bar seen for each.
pub fn canonicalize(mut bars: Vec<OhlcvBar>) -> Vec<OhlcvBar> {
    bars.sort_by_key(|b| b.timestamp);
    bars.dedup_by_key(|b| b.timestamp);
    bars
}

/// True when every timestamp is strictly greater than the one before it.
pub fn is_strictly_ascending(bars: &[OhlcvBar]) -> bool {
    bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;

    fn naive(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn bar_at(s: &str, close: f64) -> OhlcvBar {
        OhlcvBar {
            timestamp: naive(s),
            open: close,
            high: close,
            low: close,
            close,
            volume: 100,
            vwap: None,
        }
    }

    #[test]
    fn alpaca_utc_converts_to_exchange_time() {
        assert_eq!(
            alpaca_timestamp("2025-06-02T13:30:00Z", &New_York),
            Some(naive("2025-06-02 09:30:00"))
        );
        // Winter: EST is UTC-5.
        assert_eq!(
            alpaca_timestamp("2025-01-15T14:30:00Z", &New_York),
            Some(naive("2025-01-15 09:30:00"))
        );
    }

    #[test]
    fn alpaca_naive_string_is_kept() {
        assert_eq!(
            alpaca_timestamp("2025-06-02T09:30:00", &New_York),
            Some(naive("2025-06-02 09:30:00"))
        );
        assert_eq!(alpaca_timestamp("not a time", &New_York), None);
    }

    #[test]
    fn polygon_epoch_uses_host_zone_only() {
        let ms = 1_748_784_600_000;
        assert_eq!(
            polygon_timestamp(ms, &HostZone::Fixed(New_York)),
            Some(naive("2025-06-01 09:30:00"))
        );
        assert_eq!(
            polygon_timestamp(ms, &HostZone::Fixed(chrono_tz::UTC)),
            Some(naive("2025-06-01 13:30:00"))
        );
    }

    #[test]
    fn ib_intraday_moves_to_exchange_time_daily_keeps_date() {
        let at = DateTime::from_timestamp(1_748_871_000, 0).unwrap();
        assert_eq!(
            ib_timestamp(at, false, &New_York),
            naive("2025-06-02 09:30:00")
        );

        let session = naive("2025-06-02 00:00:00").and_utc();
        assert_eq!(
            ib_timestamp(session, true, &New_York),
            naive("2025-06-02 00:00:00")
        );
    }

    #[test]
    fn volume_rounds_and_clamps() {
        assert_eq!(volume(1234.6), 1235);
        assert_eq!(volume(-5.0), 0);
        assert_eq!(volume(f64::NAN), 0);
    }

    #[test]
    fn canonicalize_sorts_and_keeps_first_duplicate() {
        let bars = vec![
            bar_at("2025-06-02 09:32:00", 3.0),
            bar_at("2025-06-02 09:30:00", 1.0),
            bar_at("2025-06-02 09:31:00", 2.0),
            bar_at("2025-06-02 09:30:00", 9.0),
        ];
        let out = canonicalize(bars);
        assert_eq!(out.len(), 3);
        assert!(is_strictly_ascending(&out));
        assert_eq!(out[0].close, 1.0);
    }
}
