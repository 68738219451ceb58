//! Polygon.io (Massive) aggregates provider.
//!
//! Fetches bars from the v2 aggregates endpoint in a single request. Rate
//! limit responses may carry a `Retry-After` hint which is honoured alongside
//! the pacing floor and exponential backoff.
//!
//! Timestamps arrive as epoch milliseconds and are rendered in the host zone,
//! not the exchange zone; naive window endpoints are read the same way. This
//! matches how the feed has always been consumed, so bars line up with the
//! other vendors only on hosts running on exchange time.

use super::backoff::{parse_retry_after, Backoff, BackoffPolicy, Jitter};
use super::clock::{Clock, SystemClock};
use super::config::PolygonConfig;
use super::normalize::{self, HostZone};
use super::provider::{BarProvider, BarResult, ProviderError};
use super::rate_limiter::RateLimiter;
use super::transport::{HttpRequest, HttpTransport, ReqwestTransport, TransportError};
use crate::domain::{Granularity, OhlcvBar, WindowTime};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const RESULT_LIMIT: &str = "50000";

/// Aggregates response envelope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggsResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    results: Option<Vec<AggBar>>,
    #[serde(default)]
    results_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AggBar {
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
    #[serde(default)]
    vw: Option<f64>,
}

#[derive(Debug)]
enum Failure {
    RateLimited { hint: Option<Duration> },
    Server(u16),
    Transport(TransportError),
    Malformed(String),
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::RateLimited { hint: Some(h) } => {
                write!(f, "rate limited (HTTP 429, retry after {:.1}s)", h.as_secs_f64())
            }
            Failure::RateLimited { hint: None } => f.write_str("rate limited (HTTP 429)"),
            Failure::Server(status) => write!(f, "server error (HTTP {status})"),
            Failure::Transport(e) => write!(f, "{e}"),
            Failure::Malformed(reason) => write!(f, "unexpected response: {reason}"),
        }
    }
}

pub struct PolygonProvider {
    config: PolygonConfig,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    limiter: RateLimiter,
    backoff: Backoff,
    host_zone: HostZone,
}

impl PolygonProvider {
    /// Provider backed by a real HTTP client and the system clock.
    pub fn new(config: PolygonConfig) -> Result<Self, ProviderError> {
        let transport = ReqwestTransport::new(config.settings.timeout)
            .map_err(|e| ProviderError::HttpClient(e.to_string()))?;
        Ok(Self::with_transport(
            config,
            Arc::new(transport),
            Arc::new(SystemClock),
        ))
    }

    pub fn with_transport(
        config: PolygonConfig,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiter = RateLimiter::new(config.settings.rate_limit_delay, clock.clone());
        let backoff = Backoff::new(Self::backoff_policy(&config));
        Self {
            config,
            transport,
            clock,
            limiter,
            backoff,
            host_zone: HostZone::System,
        }
    }

    /// Zone the host clock is assumed to run in. Defaults to the system zone.
    pub fn with_host_zone(mut self, host_zone: HostZone) -> Self {
        self.host_zone = host_zone;
        self
    }

    /// Replace the jitter source, e.g. with a seeded one.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Exponential from `backoff_base` with jitter of up to a quarter of the
    /// delay (never more than a second), clamped to the cap.
    pub fn backoff_policy(config: &PolygonConfig) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: config.settings.max_retries,
            base: config.settings.backoff_base,
            cap: config.settings.backoff_cap,
            jitter: Jitter::Proportional {
                fraction: 0.25,
                ceiling: Duration::from_secs(1),
            },
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn api_key(&self) -> Result<String, ProviderError> {
        match &self.config.api_key {
            Some(key) if !key.is_empty() => Ok(key.clone()),
            _ => Err(ProviderError::MissingCredentials {
                provider: "polygon",
                hint: "set POLYGON_API_KEY or MASSIVE_API_KEY",
            }),
        }
    }

    fn epoch_ms(&self, t: &WindowTime) -> Result<i64, ProviderError> {
        self.host_zone
            .resolve(t)
            .map(|dt| dt.timestamp_millis())
            .ok_or_else(|| ProviderError::InvalidRequest(format!("unresolvable time {t}")))
    }

    fn aggs_url(&self, ticker: &str, granularity: Granularity, start_ms: i64, end_ms: i64) -> String {
        format!(
            "{}/v2/aggs/ticker/{ticker}/range/1/{}/{start_ms}/{end_ms}",
            self.config.settings.base_url.trim_end_matches('/'),
            granularity.polygon_timespan(),
        )
    }

    /// Decode the envelope. `Ok(vec![])` is a confirmed empty answer.
    fn parse_response(body: &str, host: &HostZone) -> Result<Vec<OhlcvBar>, String> {
        let resp: AggsResponse =
            serde_json::from_str(body).map_err(|e| format!("aggregates decode: {e}"))?;

        match resp.status.as_deref() {
            Some("OK") | Some("DELAYED") => {}
            other => return Err(format!("status={}", other.unwrap_or("<missing>"))),
        }

        let results = resp.results.unwrap_or_default();
        if results.is_empty() {
            debug!(results_count = resp.results_count.unwrap_or(0), "empty aggregates");
            return Ok(Vec::new());
        }

        results
            .into_iter()
            .map(|r| {
                let timestamp = normalize::polygon_timestamp(r.t, host)
                    .ok_or_else(|| format!("epoch out of range: {}", r.t))?;
                Ok(OhlcvBar {
                    timestamp,
                    open: r.o,
                    high: r.h,
                    low: r.l,
                    close: r.c,
                    volume: normalize::volume(r.v),
                    vwap: r.vw,
                })
            })
            .collect()
    }
}

impl BarProvider for PolygonProvider {
    fn name(&self) -> &'static str {
        "polygon"
    }

    fn fetch(
        &mut self,
        ticker: &str,
        start: WindowTime,
        end: WindowTime,
        granularity: Granularity,
    ) -> Result<BarResult, ProviderError> {
        let api_key = self.api_key()?;
        let start_ms = self.epoch_ms(&start)?;
        let end_ms = self.epoch_ms(&end)?;
        let url = self.aggs_url(ticker, granularity, start_ms, end_ms);

        info!(provider = "polygon", ticker, %start, %end, %granularity, "fetching bars");
        // The key only ever travels in the query string; log the bare URL.
        debug!(provider = "polygon", %url, "aggregates request");

        let request = HttpRequest::get(url)
            .query("adjusted", "true")
            .query("sort", "asc")
            .query("limit", RESULT_LIMIT)
            .query("apiKey", api_key)
            .timeout(self.config.settings.timeout);

        let floor = self.limiter.min_interval();
        let max_retries = self.backoff.policy().max_retries;
        for attempt in 0..max_retries {
            self.limiter.wait();
            let outcome = self.transport.send(&request);
            self.limiter.record_request();

            let failure = match outcome {
                Err(e) => Failure::Transport(e),
                Ok(resp) if resp.is_rate_limited() => Failure::RateLimited {
                    hint: resp
                        .header("retry-after")
                        .and_then(|v| parse_retry_after(v, self.clock.utc_now())),
                },
                Ok(resp) if resp.is_auth_failure() => {
                    return Err(ProviderError::InvalidCredentials {
                        provider: "polygon",
                        status: resp.status,
                    });
                }
                Ok(resp) if resp.is_server_error() => Failure::Server(resp.status),
                Ok(resp) if !resp.is_success() => {
                    warn!(
                        provider = "polygon",
                        ticker,
                        status = resp.status,
                        body = resp.body_snippet(),
                        "request rejected"
                    );
                    return Ok(BarResult::RetryLater);
                }
                Ok(resp) => match Self::parse_response(&resp.body, &self.host_zone) {
                    Ok(bars) => {
                        let result = BarResult::from_bars(normalize::canonicalize(bars));
                        if result.is_empty() {
                            info!(provider = "polygon", ticker, "no data");
                        }
                        return Ok(result);
                    }
                    Err(reason) => Failure::Malformed(reason),
                },
            };

            if self.backoff.policy().is_last_attempt(attempt) {
                warn!(
                    provider = "polygon",
                    ticker,
                    attempts = attempt + 1,
                    %failure,
                    "retries exhausted"
                );
                return Ok(BarResult::RetryLater);
            }

            let hint = match &failure {
                Failure::RateLimited { hint } => *hint,
                _ => None,
            };
            let wait = self.backoff.delay(attempt, floor, hint);
            warn!(
                provider = "polygon",
                ticker,
                attempt = attempt + 1,
                max_retries,
                wait_ms = wait.as_millis() as u64,
                %failure,
                "request failed, backing off"
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
