//! Retry delay computation and server retry-hint parsing.
//!
//! A failed attempt `a` (0-based) waits `min(cap, base * 2^a)`, raised to the
//! pacing floor and any server hint, plus vendor-specific jitter. The jitter
//! shape differs per vendor and is part of each vendor's policy.

use chrono::{DateTime, NaiveDateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// How random slack is added on top of the computed delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Jitter {
    /// Uniform in `[0, max)`, added without clamping.
    Flat { max: Duration },
    /// Uniform in `[0, min(ceiling, delay * fraction))`; the jittered delay is
    /// then clamped to the policy cap.
    Proportional { fraction: f64, ceiling: Duration },
    None,
}

impl Jitter {
    /// Largest amount jitter can add for a pre-jitter delay of `delay`.
    pub fn max_for(&self, delay: Duration) -> Duration {
        match *self {
            Jitter::Flat { max } => max,
            Jitter::Proportional { fraction, ceiling } => delay.mul_f64(fraction).min(ceiling),
            Jitter::None => Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Total attempts allowed for one request, including the first.
    pub max_retries: u32,
    pub base: Duration,
    pub cap: Duration,
    pub jitter: Jitter,
}

impl BackoffPolicy {
    /// Pre-jitter delay after a failure at `attempt`: `min(cap, base * 2^attempt)`.
    pub fn exponential(&self, attempt: u32) -> Duration {
        if attempt >= 63 {
            return self.cap;
        }
        let factor = (1u64 << attempt) as f64;
        let secs = self.base.as_secs_f64() * factor;
        if !secs.is_finite() || secs >= self.cap.as_secs_f64() {
            self.cap
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// True when `attempt` is the final one the budget allows.
    pub fn is_last_attempt(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) >= self.max_retries
    }

    /// Upper bound on any delay this policy can produce when floor and hint
    /// stay within the cap.
    pub fn max_delay(&self) -> Duration {
        match self.jitter {
            Jitter::Proportional { .. } => self.cap,
            other => self.cap + other.max_for(self.cap),
        }
    }
}

/// Backoff state: the policy plus the jitter source.
#[derive(Debug)]
pub struct Backoff {
    policy: BackoffPolicy,
    rng: StdRng,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            policy,
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic jitter for tests.
    pub fn with_seed(policy: BackoffPolicy, seed: u64) -> Self {
        Self {
            policy,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Realized delay after a failure at `attempt`.
    ///
    /// `floor` is the pacing interval the vendor wants respected and `hint`
    /// the server's own retry hint; the larger of those and the exponential
    /// delay wins before jitter is applied.
    pub fn delay(&mut self, attempt: u32, floor: Duration, hint: Option<Duration>) -> Duration {
        let pre = self
            .policy
            .exponential(attempt)
            .max(floor)
            .max(hint.unwrap_or(Duration::ZERO));

        match self.policy.jitter {
            Jitter::Flat { max } => pre + self.sample(max),
            Jitter::Proportional { .. } => {
                let slack = self.policy.jitter.max_for(pre);
                (pre + self.sample(slack)).min(self.policy.cap)
            }
            Jitter::None => pre,
        }
    }

    fn sample(&mut self, upper: Duration) -> Duration {
        let upper = upper.as_secs_f64();
        if upper <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.rng.gen_range(0.0..upper))
    }
}

/// Parse a `Retry-After` value: delta seconds or an HTTP-date.
///
/// Dates in the past yield zero. Garbage, negative or non-finite values
/// yield `None`.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(secs) = value.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).ok();
    }

    let at = DateTime::parse_from_rfc2822(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            // asctime form: "Sun Nov  6 08:49:37 1994"
            NaiveDateTime::parse_from_str(value, "%a %b %e %H:%M:%S %Y")
                .ok()
                .map(|n| n.and_utc())
        })?;

    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}
