//! Per-instance request pacing.
//!
//! The limiter remembers the earliest instant the next request may go out.
//! It starts at "now" so the first request never waits, and it lives as long
//! as the provider that owns it, so pacing carries across fetch calls.

use super::clock::Clock;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct RateLimiter {
    min_interval: Duration,
    next_allowed: Instant,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        let next_allowed = clock.now();
        Self {
            min_interval,
            next_allowed,
            clock,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Earliest instant the next request may be issued.
    pub fn next_allowed_at(&self) -> Instant {
        self.next_allowed
    }

    /// Block until the next request is allowed. Returns how long it slept.
    pub fn wait(&self) -> Duration {
        let now = self.clock.now();
        if now < self.next_allowed {
            let wait = self.next_allowed - now;
            self.clock.sleep(wait);
            wait
        } else {
            Duration::ZERO
        }
    }

    /// Record that a request attempt just finished, successful or not.
    pub fn record_request(&mut self) {
        self.bump(Duration::ZERO);
    }

    /// Push the next allowed instant out by at least `extra` from now, while
    /// still honouring the steady pacing floor.
    pub fn bump(&mut self, extra: Duration) {
        let now = self.clock.now();
        let paced = now + self.min_interval;
        let penalised = now + extra;
        self.next_allowed = self.next_allowed.max(paced).max(penalised);
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("min_interval", &self.min_interval)
            .field("next_allowed", &self.next_allowed)
            .finish()
    }
}
