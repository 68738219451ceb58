//! Provider capability contract and the tri-state fetch result.
//!
//! The BarProvider trait abstracts over the three upstream vendors so callers
//! can swap implementations through the factory and mock them in tests.

use super::normalize;
use crate::domain::{Granularity, OhlcvBar, WindowTime};
use std::time::Duration;
use thiserror::Error;

/// Outcome of a single fetch call.
///
/// The three variants are never interchangeable. `Empty` is an authoritative
/// "the vendor has no bars for this window"; `RetryLater` means the call did
/// not complete and nothing may be concluded about the data.
#[derive(Debug, Clone, PartialEq)]
pub enum BarResult {
    /// Non-empty, normalized, strictly ascending bars.
    Found(Vec<OhlcvBar>),
    /// The vendor answered successfully with zero bars.
    Empty,
    /// Rate limits, transport failures or server errors exhausted the retry budget.
    RetryLater,
}

impl BarResult {
    /// Wrap an accumulated sequence, mapping an empty one to `Empty`.
    pub fn from_bars(bars: Vec<OhlcvBar>) -> Self {
        debug_assert!(
            normalize::is_strictly_ascending(&bars),
            "bars must be canonicalized first"
        );
        if bars.is_empty() {
            BarResult::Empty
        } else {
            BarResult::Found(bars)
        }
    }

    pub fn bars(&self) -> Option<&[OhlcvBar]> {
        match self {
            BarResult::Found(bars) => Some(bars),
            _ => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, BarResult::Found(_))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, BarResult::Empty)
    }

    pub fn is_retry_later(&self) -> bool {
        matches!(self, BarResult::RetryLater)
    }

    /// True when the caller may mark the fetch as completed.
    pub fn is_settled(&self) -> bool {
        !self.is_retry_later()
    }
}

/// Hard failures. Only problems no retry can fix end up here; everything
/// recoverable resolves to a [`BarResult`] instead.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("missing credentials for {provider}: {hint}")]
    MissingCredentials {
        provider: &'static str,
        hint: &'static str,
    },

    #[error("{provider} rejected the configured credentials (HTTP {status})")]
    InvalidCredentials { provider: &'static str, status: u16 },

    #[error("unknown data backend '{name}'. valid options: {valid}")]
    UnknownBackend { name: String, valid: String },

    #[error("http client setup failed: {0}")]
    HttpClient(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Config(#[from] crate::data::config::ConfigError),
}

/// Historical bar source.
///
/// `fetch` takes `&mut self` because pacing state lives inside the instance.
/// Sharing one instance across threads needs an external `Mutex`; the
/// type system enforces the serialization the limiter relies on.
pub trait BarProvider: Send {
    /// Human-readable name of this provider.
    fn name(&self) -> &'static str;

    /// Fetch bars for `ticker` between `start` and `end`.
    fn fetch(
        &mut self,
        ticker: &str,
        start: WindowTime,
        end: WindowTime,
        granularity: Granularity,
    ) -> Result<BarResult, ProviderError>;

    /// Whether the feed includes pre- and post-market bars.
    fn supports_extended_hours(&self) -> bool;

    /// Configured pacing floor between consecutive requests.
    fn min_request_interval(&self) -> Duration;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    struct MockProvider {
        result: BarResult,
    }

    impl BarProvider for MockProvider {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn fetch(
            &mut self,
            _ticker: &str,
            _start: WindowTime,
            _end: WindowTime,
            _granularity: Granularity,
        ) -> Result<BarResult, ProviderError> {
            Ok(self.result.clone())
        }

        fn supports_extended_hours(&self) -> bool {
            false
        }

        fn min_request_interval(&self) -> Duration {
            Duration::ZERO
        }
    }

    fn bar() -> OhlcvBar {
        OhlcvBar {
            timestamp: NaiveDate::from_ymd_opt(2025, 6, 2)
                .unwrap()
                .and_hms_opt(9, 30, 0)
                .unwrap(),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1,
            vwap: None,
        }
    }

    #[test]
    fn from_bars_maps_empty_to_empty() {
        assert_eq!(BarResult::from_bars(vec![]), BarResult::Empty);
        assert!(BarResult::from_bars(vec![bar()]).is_found());
    }

    #[test]
    fn retry_later_is_never_settled() {
        assert!(!BarResult::RetryLater.is_settled());
        assert!(BarResult::Empty.is_settled());
        assert!(BarResult::Found(vec![bar()]).is_settled());
        assert_ne!(BarResult::RetryLater, BarResult::Empty);
        assert!(BarResult::RetryLater.bars().is_none());
    }

    #[test]
    fn provider_is_object_safe_via_box() {
        let mut p: Box<dyn BarProvider> = Box::new(MockProvider {
            result: BarResult::Empty,
        });
        let t = WindowTime::Naive(bar().timestamp);
        let r = p.fetch("AAPL", t, t, Granularity::Minute).unwrap();
        assert!(r.is_empty());
    }

    #[test]
    fn missing_credentials_message_names_provider() {
        let err = ProviderError::MissingCredentials {
            provider: "alpaca",
            hint: "set ALPACA_API_KEY and ALPACA_SECRET_KEY",
        };
        assert_eq!(
            err.to_string(),
            "missing credentials for alpaca: set ALPACA_API_KEY and ALPACA_SECRET_KEY"
        );
    }
}
