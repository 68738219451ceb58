//! Multi-ticker fetch with progress reporting.

use super::provider::{BarProvider, BarResult, ProviderError};
use crate::domain::{Granularity, OhlcvBar, WindowTime};
use tracing::{info, warn};

/// Progress callback for multi-ticker fetches.
pub trait BatchProgress: Send {
    /// Called before fetching a ticker.
    fn on_start(&self, ticker: &str, index: usize, total: usize);

    /// Called when a ticker settles or is deferred.
    fn on_complete(&self, ticker: &str, index: usize, total: usize, result: &BarResult);

    /// Called once every ticker has been attempted.
    fn on_batch_complete(&self, summary: &BatchSummary);
}

/// Reports through `tracing`.
pub struct LogProgress;

impl BatchProgress for LogProgress {
    fn on_start(&self, ticker: &str, index: usize, total: usize) {
        info!(ticker, n = index + 1, total, "fetching");
    }

    fn on_complete(&self, ticker: &str, _index: usize, _total: usize, result: &BarResult) {
        match result {
            BarResult::Found(bars) => info!(ticker, bars = bars.len(), "found"),
            BarResult::Empty => info!(ticker, "no data"),
            BarResult::RetryLater => warn!(ticker, "deferred, retry later"),
        }
    }

    fn on_batch_complete(&self, summary: &BatchSummary) {
        info!(
            total = summary.total,
            found = summary.found.len(),
            empty = summary.empty.len(),
            pending = summary.pending.len(),
            "batch complete"
        );
    }
}

/// Silent reporter.
pub struct NoProgress;

impl BatchProgress for NoProgress {
    fn on_start(&self, _: &str, _: usize, _: usize) {}
    fn on_complete(&self, _: &str, _: usize, _: usize, _: &BarResult) {}
    fn on_batch_complete(&self, _: &BatchSummary) {}
}

/// Per-ticker classification of a batch.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub total: usize,
    /// Tickers with data, in fetch order.
    pub found: Vec<(String, Vec<OhlcvBar>)>,
    /// Tickers the vendor confirmed have no bars in the window.
    pub empty: Vec<String>,
    /// Tickers whose fetch did not complete.
    pub pending: Vec<String>,
}

impl BatchSummary {
    /// Tickers that must be fetched again.
    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    /// True when no ticker needs another attempt.
    pub fn all_settled(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn bar_count(&self) -> usize {
        self.found.iter().map(|(_, bars)| bars.len()).sum()
    }
}

/// Fetch each ticker in turn over the same window.
///
/// Pacing carries across tickers because the provider instance is shared.
/// A hard error (bad credentials, bad configuration) stops the batch, since
/// every later ticker would fail the same way.
pub fn fetch_batch(
    provider: &mut dyn BarProvider,
    tickers: &[String],
    start: WindowTime,
    end: WindowTime,
    granularity: Granularity,
    progress: &dyn BatchProgress,
) -> Result<BatchSummary, ProviderError> {
    let total = tickers.len();
    let mut summary = BatchSummary {
        total,
        ..Default::default()
    };

    for (i, ticker) in tickers.iter().enumerate() {
        progress.on_start(ticker, i, total);
        let result = provider.fetch(ticker, start, end, granularity)?;
        progress.on_complete(ticker, i, total, &result);

        match result {
            BarResult::Found(bars) => summary.found.push((ticker.clone(), bars)),
            BarResult::Empty => summary.empty.push(ticker.clone()),
            BarResult::RetryLater => summary.pending.push(ticker.clone()),
        }
    }

    progress.on_batch_complete(&summary);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    struct CannedProvider {
        answers: HashMap<String, BarResult>,
    }

    impl BarProvider for CannedProvider {
        fn name(&self) -> &'static str {
            "canned"
        }

        fn fetch(
            &mut self,
            ticker: &str,
            _start: WindowTime,
            _end: WindowTime,
            _granularity: Granularity,
        ) -> Result<BarResult, ProviderError> {
            self.answers
                .get(ticker)
                .cloned()
                .ok_or(ProviderError::InvalidCredentials {
                    provider: "canned",
                    status: 401,
                })
        }

        fn supports_extended_hours(&self) -> bool {
            false
        }

        fn min_request_interval(&self) -> Duration {
            Duration::ZERO
        }
    }

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<String>>,
    }

    impl BatchProgress for Recording {
        fn on_start(&self, ticker: &str, index: usize, total: usize) {
            self.events
                .lock()
                .unwrap()
                .push(format!("start {ticker} {}/{total}", index + 1));
        }

        fn on_complete(&self, ticker: &str, _: usize, _: usize, result: &BarResult) {
            self.events
                .lock()
                .unwrap()
                .push(format!("done {ticker} settled={}", result.is_settled()));
        }

        fn on_batch_complete(&self, summary: &BatchSummary) {
            self.events
                .lock()
                .unwrap()
                .push(format!("batch pending={}", summary.pending.len()));
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
            volume: 10,
            vwap: None,
        }
    }

    fn window() -> (WindowTime, WindowTime) {
        let d = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        (
            d.and_hms_opt(9, 30, 0).unwrap().into(),
            d.and_hms_opt(16, 0, 0).unwrap().into(),
        )
    }

    fn tickers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn classifies_each_ticker() {
        let mut provider = CannedProvider {
            answers: HashMap::from([
                ("AAPL".to_string(), BarResult::Found(vec![bar()])),
                ("DELISTED".to_string(), BarResult::Empty),
                ("MSFT".to_string(), BarResult::RetryLater),
            ]),
        };
        let (start, end) = window();
        let progress = Recording::default();
        let summary = fetch_batch(
            &mut provider,
            &tickers(&["AAPL", "DELISTED", "MSFT"]),
            start,
            end,
            Granularity::Minute,
            &progress,
        )
        .unwrap();

        assert_eq!(summary.total, 3);
        assert_eq!(summary.found.len(), 1);
        assert_eq!(summary.bar_count(), 1);
        assert_eq!(summary.empty, vec!["DELISTED"]);
        assert_eq!(summary.pending(), ["MSFT".to_string()]);
        assert!(!summary.all_settled());

        let events = progress.events.lock().unwrap();
        assert_eq!(events[0], "start AAPL 1/3");
        assert_eq!(events[5], "done MSFT settled=false");
        assert_eq!(events[6], "batch pending=1");
    }

    #[test]
    fn hard_error_stops_the_batch() {
        let mut provider = CannedProvider {
            answers: HashMap::from([("AAPL".to_string(), BarResult::Empty)]),
        };
        let (start, end) = window();
        let progress = Recording::default();
        let err = fetch_batch(
            &mut provider,
            &tickers(&["AAPL", "UNKNOWN", "MSFT"]),
            start,
            end,
            Granularity::Day,
            &progress,
        )
        .unwrap_err();

        assert!(matches!(err, ProviderError::InvalidCredentials { .. }));
        let events = progress.events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2], "start UNKNOWN 2/3");
    }

    #[test]
    fn empty_batch_is_settled() {
        let mut provider = CannedProvider {
            answers: HashMap::new(),
        };
        let (start, end) = window();
        let summary =
            fetch_batch(&mut provider, &[], start, end, Granularity::Day, &NoProgress).unwrap();
        assert!(summary.all_settled());
        assert_eq!(summary.total, 0);
    }
}
