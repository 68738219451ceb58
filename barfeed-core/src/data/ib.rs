//! Interactive Brokers historical-bar provider.
//!
//! IB serves history over a long-lived API session to TWS or IB Gateway
//! rather than stateless HTTP calls. The session is abstracted behind
//! [`HistoricalSession`]; the shipped implementation, [`TwsSession`], holds an
//! `ibapi` client connected to `{IB_HOST}:{IB_PORT}`.
//!
//! Requests are keyed by an end time plus a duration, so the window is
//! widened to whole seconds or days and the returned bars are filtered back
//! down to `[start, end]`.

use super::backoff::{Backoff, BackoffPolicy, Jitter};
use super::clock::{Clock, SystemClock};
use super::config::IbConfig;
use super::normalize;
use super::provider::{BarProvider, BarResult, ProviderError};
use super::rate_limiter::RateLimiter;
use crate::domain::{Granularity, OhlcvBar, WindowTime};
use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use ibapi::contracts::Contract;
use ibapi::market_data::historical::{self, BarSize, WhatToShow};
use ibapi::Client;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Historical Market Data Service error. Also used for pacing violations, so
/// the message decides whether it means "no data".
pub const HMDS_ERROR_CODE: i32 = 162;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SessionError {
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    #[error("gateway rejected request (code {code}): {message}")]
    Rejected { code: i32, message: String },

    #[error("gateway protocol error: {0}")]
    Protocol(String),
}

impl SessionError {
    /// IB answered, and the answer is that the window holds no bars.
    pub fn is_no_data(&self) -> bool {
        match self {
            SessionError::Rejected { code, message } => {
                *code == HMDS_ERROR_CODE && message.to_ascii_lowercase().contains("returned no data")
            }
            _ => false,
        }
    }
}

impl From<ibapi::Error> for SessionError {
    fn from(e: ibapi::Error) -> Self {
        match e {
            ibapi::Error::Message(code, message) => SessionError::Rejected { code, message },
            e @ (ibapi::Error::Io(_)
            | ibapi::Error::ConnectionFailed
            | ibapi::Error::ConnectionReset) => SessionError::Unavailable(e.to_string()),
            e => SessionError::Protocol(e.to_string()),
        }
    }
}

/// Lookback IB is asked for, ending at the request's end time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookback {
    Seconds(i32),
    Days(i32),
}

impl Lookback {
    /// Lookback covering `[start, end]`.
    ///
    /// Windows shorter than a day are sent in seconds, longer ones in whole
    /// days (`floor(days) + 1` so the trailing partial day is included).
    pub fn covering(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        let secs = (end - start).num_seconds();
        let days = secs.div_euclid(86_400) + 1;
        if days <= 1 {
            Lookback::Seconds(clamp_i32(secs.max(1)))
        } else {
            Lookback::Days(clamp_i32(days))
        }
    }
}

fn clamp_i32(v: i64) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

impl fmt::Display for Lookback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Lookback::Seconds(n) => write!(f, "{n} S"),
            Lookback::Days(n) => write!(f, "{n} D"),
        }
    }
}

impl From<Lookback> for historical::Duration {
    fn from(value: Lookback) -> Self {
        match value {
            Lookback::Seconds(n) => historical::Duration::seconds(n),
            Lookback::Days(n) => historical::Duration::days(n),
        }
    }
}

/// One TRADES history request for a SMART-routed US stock.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoricalRequest {
    pub symbol: String,
    pub end: DateTime<Utc>,
    pub lookback: Lookback,
    pub granularity: Granularity,
    pub use_rth: bool,
}

/// A bar as the session reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBar {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub average: Option<f64>,
}

pub trait HistoricalSession: Send {
    fn is_connected(&self) -> bool;

    fn connect(&mut self) -> Result<(), SessionError>;

    fn disconnect(&mut self);

    fn historical_bars(&mut self, request: &HistoricalRequest) -> Result<Vec<RawBar>, SessionError>;
}

// ── TWS API session ──────────────────────────────────────────────────

/// Session over the native TWS API socket.
pub struct TwsSession {
    address: String,
    client_id: i32,
    client: Option<Client>,
}

impl TwsSession {
    pub fn new(config: &IbConfig) -> Self {
        Self {
            address: config.address().to_string(),
            client_id: config.client_id,
            client: None,
        }
    }
}

fn bar_size(granularity: Granularity) -> BarSize {
    match granularity {
        Granularity::Minute => BarSize::Min,
        Granularity::Hour => BarSize::Hour,
        Granularity::Day => BarSize::Day,
    }
}

fn utc_instant(at: time::OffsetDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(at.unix_timestamp(), at.nanosecond())
}

fn raw_bar(bar: &historical::Bar) -> Option<RawBar> {
    Some(RawBar {
        time: utc_instant(bar.date)?,
        open: bar.open,
        high: bar.high,
        low: bar.low,
        close: bar.close,
        volume: bar.volume,
        average: (bar.wap.is_finite() && bar.wap > 0.0).then_some(bar.wap),
    })
}

impl HistoricalSession for TwsSession {
    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn connect(&mut self) -> Result<(), SessionError> {
        if self.client.is_some() {
            return Ok(());
        }
        info!(provider = "ib", address = %self.address, client_id = self.client_id, "connecting");
        let client = Client::connect(&self.address, self.client_id)?;
        self.client = Some(client);
        info!(provider = "ib", "connected");
        Ok(())
    }

    fn disconnect(&mut self) {
        // Dropping the client closes the socket.
        if self.client.take().is_some() {
            debug!(provider = "ib", "disconnected");
        }
    }

    fn historical_bars(&mut self, request: &HistoricalRequest) -> Result<Vec<RawBar>, SessionError> {
        let Some(client) = &self.client else {
            return Err(SessionError::Unavailable("not connected".into()));
        };
        let end = time::OffsetDateTime::from_unix_timestamp(request.end.timestamp())
            .map_err(|e| SessionError::Protocol(format!("end time: {e}")))?;
        debug!(
            provider = "ib",
            symbol = %request.symbol,
            duration = %request.lookback,
            bar_size = request.granularity.ib_bar_size(),
            "historical request"
        );

        let outcome = client.historical_data(
            &Contract::stock(&request.symbol),
            Some(end),
            request.lookback.into(),
            bar_size(request.granularity),
            WhatToShow::Trades,
            request.use_rth,
        );
        match outcome {
            Ok(data) => Ok(data
                .bars
                .iter()
                .filter_map(|bar| {
                    let raw = raw_bar(bar);
                    if raw.is_none() {
                        warn!(provider = "ib", date = %bar.date, "unrepresentable bar date");
                    }
                    raw
                })
                .collect()),
            Err(e) => {
                let e = SessionError::from(e);
                if matches!(e, SessionError::Unavailable(_)) {
                    // Lost the socket; reconnect on the next request.
                    self.client = None;
                }
                Err(e)
            }
        }
    }
}

// ── Provider ─────────────────────────────────────────────────────────

/// TRADES history for `ticker` over `[start, end]` in exchange time, ending
/// at the instant `end_at`.
pub fn historical_request(
    ticker: &str,
    start: NaiveDateTime,
    end: NaiveDateTime,
    end_at: DateTime<Utc>,
    granularity: Granularity,
) -> HistoricalRequest {
    HistoricalRequest {
        symbol: ticker.to_string(),
        end: end_at,
        lookback: Lookback::covering(start, end),
        granularity,
        use_rth: false,
    }
}

pub struct IbProvider {
    config: IbConfig,
    session: Box<dyn HistoricalSession>,
    limiter: RateLimiter,
    backoff: Backoff,
}

impl IbProvider {
    /// Provider on a TWS API session. Nothing connects until the first fetch.
    pub fn new(config: IbConfig) -> Self {
        let session = TwsSession::new(&config);
        Self::with_session(config, Box::new(session), Arc::new(SystemClock))
    }

    pub fn with_session(
        config: IbConfig,
        session: Box<dyn HistoricalSession>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiter = RateLimiter::new(config.settings.rate_limit_delay, clock);
        let backoff = Backoff::new(Self::backoff_policy(&config));
        Self {
            config,
            session,
            limiter,
            backoff,
        }
    }

    /// Plain exponential; the session is local so there is nothing to spread.
    pub fn backoff_policy(config: &IbConfig) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: config.settings.max_retries,
            base: config.settings.backoff_base,
            cap: config.settings.backoff_cap,
            jitter: Jitter::None,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn attempt(&mut self, request: &HistoricalRequest) -> Result<Vec<RawBar>, SessionError> {
        if !self.session.is_connected() {
            self.session.connect()?;
        }
        self.session.historical_bars(request)
    }

    /// Keep bars inside `[start, end]`.
    fn to_bars(
        raw: Vec<RawBar>,
        granularity: Granularity,
        tz: &Tz,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Vec<OhlcvBar> {
        let daily = granularity == Granularity::Day;
        raw.into_iter()
            .filter_map(|b| {
                let timestamp = normalize::ib_timestamp(b.time, daily, tz);
                (start <= timestamp && timestamp <= end).then(|| OhlcvBar {
                    timestamp,
                    open: b.open,
                    high: b.high,
                    low: b.low,
                    close: b.close,
                    volume: if b.volume.is_finite() && b.volume > 0.0 {
                        b.volume.trunc() as u64
                    } else {
                        0
                    },
                    vwap: b.average,
                })
            })
            .collect()
    }
}

impl BarProvider for IbProvider {
    fn name(&self) -> &'static str {
        "ib"
    }

    fn fetch(
        &mut self,
        ticker: &str,
        start: WindowTime,
        end: WindowTime,
        granularity: Granularity,
    ) -> Result<BarResult, ProviderError> {
        let tz = self.config.settings.exchange_tz;
        let end_at = end
            .to_utc(&tz)
            .ok_or_else(|| ProviderError::InvalidRequest(format!("unresolvable time {end}")))?;
        let start = start.to_naive_in(&tz);
        let end = end.to_naive_in(&tz);
        info!(provider = "ib", ticker, %start, %end, %granularity, "fetching bars");

        if end < start {
            debug!(provider = "ib", ticker, "inverted window");
            return Ok(BarResult::Empty);
        }

        let request = historical_request(ticker, start, end, end_at, granularity);
        let max_retries = self.backoff.policy().max_retries;
        for attempt in 0..max_retries {
            self.limiter.wait();
            let outcome = self.attempt(&request);
            self.limiter.record_request();

            let error = match outcome {
                Ok(raw) => {
                    let bars = Self::to_bars(raw, granularity, &tz, start, end);
                    let result = BarResult::from_bars(normalize::canonicalize(bars));
                    if result.is_empty() {
                        info!(provider = "ib", ticker, "no data");
                    }
                    return Ok(result);
                }
                Err(e) if e.is_no_data() => {
                    info!(provider = "ib", ticker, "no data");
                    return Ok(BarResult::Empty);
                }
                Err(e) => e,
            };

            if self.backoff.policy().is_last_attempt(attempt) {
                warn!(
                    provider = "ib",
                    ticker,
                    attempts = attempt + 1,
                    %error,
                    "session request failed"
                );
                return Ok(BarResult::RetryLater);
            }

            let wait = self.backoff.delay(attempt, Duration::ZERO, None);
            warn!(
                provider = "ib",
                ticker,
                attempt = attempt + 1,
                max_retries,
                wait_ms = wait.as_millis() as u64,
                %error,
                "session request failed, backing off"
            );
            self.limiter.bump(wait);
        }

        Ok(BarResult::RetryLater)
    }

    fn supports_extended_hours(&self) -> bool {
        true
    }

    fn min_request_interval(&self) -> Duration {
        self.limiter.min_interval()
    }
}

impl Drop for IbProvider {
    fn drop(&mut self) {
        self.session.disconnect();
    }
}
