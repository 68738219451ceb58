//! Property tests for retry timing and bar normalization.
//!
//! Uses proptest to verify:
//! 1. Backoff bound: every realized delay stays within the policy envelope
//! 2. Ordering: provider output is strictly ascending whatever order the vendor sends
//! 3. Retry-After: numeric hints parse to exactly that many seconds

use barfeed_core::data::backoff::{parse_retry_after, Backoff, BackoffPolicy, Jitter};
use barfeed_core::data::clock::ManualClock;
use barfeed_core::data::normalize;
use barfeed_core::data::transport::{HttpResponse, ScriptedTransport};
use barfeed_core::data::{AlpacaConfig, AlpacaProvider, BarProvider, BarResult};
use barfeed_core::domain::{Granularity, OhlcvBar, WindowTime};
use chrono::{NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_policy() -> impl Strategy<Value = BackoffPolicy> {
    (1u64..5_000, 1u64..300_000, any::<bool>()).prop_map(|(base_ms, cap_ms, proportional)| {
        let jitter = if proportional {
            Jitter::Proportional {
                fraction: 0.25,
                ceiling: Duration::from_secs(1),
            }
        } else {
            Jitter::Flat {
                max: Duration::from_secs(1),
            }
        };
        BackoffPolicy {
            max_retries: 8,
            base: Duration::from_millis(base_ms),
            cap: Duration::from_millis(cap_ms.max(base_ms)),
            jitter,
        }
    })
}

/// Minute offsets from 09:30, possibly repeated, in arbitrary order.
fn arb_minutes() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(0u32..390, 0..60)
}

// ── 1. Backoff bound ─────────────────────────────────────────────────

proptest! {
    /// With floor and hint inside the cap, no delay exceeds `max_delay`, and
    /// none is shorter than the exponential term.
    #[test]
    fn delay_stays_within_envelope(
        policy in arb_policy(),
        attempt in 0u32..40,
        floor_ms in 0u64..10_000,
        hint_ms in prop::option::of(0u64..10_000),
        seed in any::<u64>(),
    ) {
        let floor = Duration::from_millis(floor_ms).min(policy.cap);
        let hint = hint_ms.map(|h| Duration::from_millis(h).min(policy.cap));
        let mut backoff = Backoff::with_seed(policy, seed);

        let d = backoff.delay(attempt, floor, hint);
        prop_assert!(d <= policy.max_delay());
        prop_assert!(d >= policy.exponential(attempt).min(policy.cap));
        prop_assert!(d >= floor);
    }

    /// The exponential term never decreases with the attempt number.
    #[test]
    fn exponential_is_monotone(policy in arb_policy(), attempt in 0u32..70) {
        prop_assert!(policy.exponential(attempt) <= policy.exponential(attempt + 1));
        prop_assert!(policy.exponential(attempt) <= policy.cap);
    }

    /// Proportional jitter adds at most a quarter of the delay and one second.
    #[test]
    fn proportional_jitter_is_bounded(attempt in 0u32..8, seed in any::<u64>()) {
        let policy = BackoffPolicy {
            max_retries: 8,
            base: Duration::from_secs(2),
            cap: Duration::from_secs(120),
            jitter: Jitter::Proportional { fraction: 0.25, ceiling: Duration::from_secs(1) },
        };
        let mut backoff = Backoff::with_seed(policy, seed);
        let pre = policy.exponential(attempt);
        let d = backoff.delay(attempt, Duration::ZERO, None);
        prop_assert!(d >= pre);
        prop_assert!(d <= (pre + Duration::from_secs(1)).min(policy.cap));
    }
}

// ── 2. Ordering ──────────────────────────────────────────────────────

fn page_body(minutes: &[u32]) -> String {
    let bars: Vec<String> = minutes
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let utc = Utc.with_ymd_and_hms(2025, 6, 2, 13, 30, 0).unwrap()
                + chrono::Duration::minutes(i64::from(*m));
            format!(
                r#"{{"t":"{}","o":1,"h":2,"l":0.5,"c":{},"v":10}}"#,
                utc.format("%Y-%m-%dT%H:%M:%SZ"),
                i
            )
        })
        .collect();
    format!(r#"{{"bars":[{}],"next_page_token":null}}"#, bars.join(","))
}

proptest! {
    /// Whatever order and duplication the vendor sends, the result is
    /// strictly ascending with one bar per distinct minute.
    #[test]
    fn provider_output_is_strictly_ascending(minutes in arb_minutes()) {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(HttpResponse::new(
            200,
            page_body(&minutes),
        ))]));
        let mut provider = AlpacaProvider::with_transport(
            AlpacaConfig::new("k", "s"),
            transport,
            Arc::new(ManualClock::default()),
        );
        let day = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let start: WindowTime = day.and_hms_opt(9, 30, 0).unwrap().into();
        let end: WindowTime = day.and_hms_opt(16, 0, 0).unwrap().into();

        let result = provider.fetch("AAPL", start, end, Granularity::Minute).unwrap();

        let mut distinct = minutes.clone();
        distinct.sort_unstable();
        distinct.dedup();
        match result {
            BarResult::Found(bars) => {
                prop_assert!(normalize::is_strictly_ascending(&bars));
                prop_assert_eq!(bars.len(), distinct.len());
            }
            BarResult::Empty => prop_assert!(minutes.is_empty()),
            BarResult::RetryLater => prop_assert!(false, "unexpected RetryLater"),
        }
    }

    /// Canonicalization keeps the first bar seen for a repeated timestamp.
    #[test]
    fn canonicalize_keeps_first_occurrence(minutes in arb_minutes()) {
        let day = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let bars: Vec<OhlcvBar> = minutes
            .iter()
            .enumerate()
            .map(|(i, m)| OhlcvBar {
                timestamp: day.and_hms_opt(9, 30, 0).unwrap() + chrono::Duration::minutes(i64::from(*m)),
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: i as f64,
                volume: 1,
                vwap: None,
            })
            .collect();

        let out = normalize::canonicalize(bars.clone());
        prop_assert!(normalize::is_strictly_ascending(&out));
        for bar in &out {
            let first = bars.iter().find(|b| b.timestamp == bar.timestamp).unwrap();
            prop_assert_eq!(bar.close, first.close);
        }
    }
}

// ── 3. Retry-After ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn numeric_retry_after_is_exact(secs in 0u64..100_000) {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();
        prop_assert_eq!(
            parse_retry_after(&secs.to_string(), now),
            Some(Duration::from_secs(secs))
        );
    }

    #[test]
    fn http_date_retry_after_measures_from_now(secs in 0i64..86_400) {
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();
        let at = now + chrono::Duration::seconds(secs);
        let header = at.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        prop_assert_eq!(
            parse_retry_after(&header, now),
            Some(Duration::from_secs(secs as u64))
        );
    }
}
