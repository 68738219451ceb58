//! Time source used by pacing and backoff.
//!
//! Providers never call `Instant::now()` or `thread::sleep` directly; they go
//! through a [`Clock`] so tests can run retry sequences against virtual time.

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
    /// Monotonic now, used for limiter arithmetic.
    fn now(&self) -> Instant;

    /// Wall-clock now, used to resolve HTTP-date retry hints.
    fn utc_now(&self) -> DateTime<Utc>;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Real clock. `sleep` blocks the thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Virtual clock: `sleep` advances time instantly and records the request.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    utc_origin: DateTime<Utc>,
    state: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new(utc_origin: DateTime<Utc>) -> Self {
        Self {
            origin: Instant::now(),
            utc_origin,
            state: Mutex::new(ManualState::default()),
        }
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, by: Duration) {
        self.lock().elapsed += by;
    }

    /// Virtual time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        // Plain data: recover from poisoning.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.lock().elapsed
    }

    fn utc_now(&self) -> DateTime<Utc> {
        let elapsed = self.lock().elapsed;
        self.utc_origin + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.lock();
        state.elapsed += duration;
        state.sleeps.push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_sleep_advances_both_clocks() {
        let origin = Utc.with_ymd_and_hms(2025, 6, 2, 13, 30, 0).unwrap();
        let clock = ManualClock::new(origin);
        let start = clock.now();

        clock.sleep(Duration::from_secs(2));
        clock.advance(Duration::from_millis(500));

        assert_eq!(clock.now() - start, Duration::from_millis(2500));
        assert_eq!(clock.utc_now(), origin + chrono::Duration::milliseconds(2500));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(2)]);
    }

    #[test]
    fn system_clock_zero_sleep_returns_immediately() {
        let clock = SystemClock;
        let before = clock.now();
        clock.sleep(Duration::ZERO);
        assert!(clock.now() - before < Duration::from_secs(1));
    }
}
