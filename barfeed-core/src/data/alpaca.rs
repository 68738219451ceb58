//! Alpaca Markets data provider.
//!
//! Fetches bars from the v2 stock bars endpoint. Request windows are sent as
//! UTC; response timestamps come back in UTC and are moved to the exchange
//! zone. Results are paginated through `next_page_token`, and the retry
//! budget starts fresh for every page.

use super::backoff::{Backoff, BackoffPolicy, Jitter};
use super::clock::{Clock, SystemClock};
use super::config::AlpacaConfig;
use super::normalize;
use super::provider::{BarProvider, BarResult, ProviderError};
use super::rate_limiter::RateLimiter;
use super::transport::{HttpRequest, HttpTransport, ReqwestTransport, TransportError};
use crate::domain::{Granularity, OhlcvBar, WindowTime};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const PAGE_LIMIT: &str = "10000";

/// One page of the bars endpoint.
#[derive(Debug, Deserialize)]
struct BarsPage {
    #[serde(default)]
    bars: Option<Vec<AlpacaBar>>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaBar {
    t: String,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
    #[serde(default)]
    vw: Option<f64>,
}

/// Why an attempt did not produce a page.
#[derive(Debug)]
enum Failure {
    RateLimited,
    Server(u16),
    Transport(TransportError),
    Malformed(String),
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::RateLimited => f.write_str("rate limited (HTTP 429)"),
            Failure::Server(status) => write!(f, "server error (HTTP {status})"),
            Failure::Transport(e) => write!(f, "{e}"),
            Failure::Malformed(reason) => write!(f, "unexpected response: {reason}"),
        }
    }
}

pub struct AlpacaProvider {
    config: AlpacaConfig,
    transport: Arc<dyn HttpTransport>,
    limiter: RateLimiter,
    backoff: Backoff,
}

impl AlpacaProvider {
    /// Provider backed by a real HTTP client and the system clock.
    pub fn new(config: AlpacaConfig) -> Result<Self, ProviderError> {
        let transport = ReqwestTransport::new(config.settings.timeout)
            .map_err(|e| ProviderError::HttpClient(e.to_string()))?;
        Ok(Self::with_transport(
            config,
            Arc::new(transport),
            Arc::new(SystemClock),
        ))
    }

    pub fn with_transport(
        config: AlpacaConfig,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let limiter = RateLimiter::new(config.settings.rate_limit_delay, clock);
        let backoff = Backoff::new(Self::backoff_policy(&config));
        Self {
            config,
            transport,
            limiter,
            backoff,
        }
    }

    /// Replace the jitter source, e.g. with a seeded one.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Exponential from `backoff_base`, capped, plus a flat second of jitter.
    pub fn backoff_policy(config: &AlpacaConfig) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: config.settings.max_retries,
            base: config.settings.backoff_base,
            cap: config.settings.backoff_cap,
            jitter: Jitter::Flat {
                max: Duration::from_secs(1),
            },
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn credentials(&self) -> Result<(String, String), ProviderError> {
        match (&self.config.api_key, &self.config.secret_key) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Ok((key.clone(), secret.clone()))
            }
            _ => Err(ProviderError::MissingCredentials {
                provider: "alpaca",
                hint: "set ALPACA_API_KEY and ALPACA_SECRET_KEY",
            }),
        }
    }

    fn bars_url(&self, ticker: &str) -> String {
        format!(
            "{}/v2/stocks/{ticker}/bars",
            self.config.settings.base_url.trim_end_matches('/')
        )
    }

    /// Resolve a window endpoint to UTC, reading naive values as exchange time.
    fn to_utc(&self, t: &WindowTime) -> Result<DateTime<Utc>, ProviderError> {
        t.to_utc(&self.config.settings.exchange_tz)
            .ok_or_else(|| ProviderError::InvalidRequest(format!("unresolvable time {t}")))
    }

    #[allow(clippy::too_many_arguments)]
    fn page_request(
        &self,
        ticker: &str,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
        granularity: Granularity,
        page_token: Option<&str>,
        key: &str,
        secret: &str,
    ) -> HttpRequest {
        let mut req = HttpRequest::get(self.bars_url(ticker))
            .query("start", start.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .query("end", end.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .query("timeframe", granularity.alpaca_timeframe())
            .query("adjustment", "split")
            .query("limit", PAGE_LIMIT)
            .query("sort", "asc")
            .header("APCA-API-KEY-ID", key)
            .header("APCA-API-SECRET-KEY", secret)
            .timeout(self.config.settings.timeout);
        if let Some(token) = page_token {
            req = req.query("page_token", token);
        }
        req
    }

    /// Decode one page into canonical bars plus its continuation cursor.
    fn parse_page(
        body: &str,
        exchange: &Tz,
    ) -> Result<(Vec<OhlcvBar>, Option<String>), String> {
        let page: BarsPage =
            serde_json::from_str(body).map_err(|e| format!("bars page decode: {e}"))?;

        let raw = page.bars.unwrap_or_default();
        let mut bars = Vec::with_capacity(raw.len());
        for b in raw {
            let timestamp = normalize::alpaca_timestamp(&b.t, exchange)
                .ok_or_else(|| format!("unparseable bar timestamp '{}'", b.t))?;
            bars.push(OhlcvBar {
                timestamp,
                open: b.o,
                high: b.h,
                low: b.l,
                close: b.c,
                volume: normalize::volume(b.v),
                vwap: b.vw,
            });
        }

        let cursor = page.next_page_token.filter(|t| !t.is_empty());
        Ok((bars, cursor))
    }
}

impl BarProvider for AlpacaProvider {
    fn name(&self) -> &'static str {
        "alpaca"
    }

    fn fetch(
        &mut self,
        ticker: &str,
        start: WindowTime,
        end: WindowTime,
        granularity: Granularity,
    ) -> Result<BarResult, ProviderError> {
        let (key, secret) = self.credentials()?;
        let start_utc = self.to_utc(&start)?;
        let end_utc = self.to_utc(&end)?;
        let exchange = self.config.settings.exchange_tz;

        info!(provider = "alpaca", ticker, %start, %end, %granularity, "fetching bars");

        let mut bars: Vec<OhlcvBar> = Vec::new();
        let mut page_token: Option<String> = None;
        let mut attempt: u32 = 0;

        loop {
            self.limiter.wait();
            let request = self.page_request(
                ticker,
                &start_utc,
                &end_utc,
                granularity,
                page_token.as_deref(),
                &key,
                &secret,
            );
            let outcome = self.transport.send(&request);
            self.limiter.record_request();

            let failure = match outcome {
                Err(e) => Failure::Transport(e),
                Ok(resp) if resp.is_rate_limited() => Failure::RateLimited,
                Ok(resp) if resp.is_auth_failure() => {
                    return Err(ProviderError::InvalidCredentials {
                        provider: "alpaca",
                        status: resp.status,
                    });
                }
                Ok(resp) if resp.is_server_error() => Failure::Server(resp.status),
                Ok(resp) if !resp.is_success() => {
                    warn!(
                        provider = "alpaca",
                        ticker,
                        status = resp.status,
                        body = resp.body_snippet(),
                        "request rejected"
                    );
                    return Ok(BarResult::RetryLater);
                }
                Ok(resp) => match Self::parse_page(&resp.body, &exchange) {
                    Ok((page, cursor)) => {
                        let page_len = page.len();
                        bars.extend(page);
                        match cursor {
                            Some(token) if page_len > 0 => {
                                debug!(provider = "alpaca", ticker, page_len, "next page");
                                page_token = Some(token);
                                attempt = 0;
                                continue;
                            }
                            _ => {
                                let result = BarResult::from_bars(normalize::canonicalize(bars));
                                if result.is_empty() {
                                    info!(provider = "alpaca", ticker, "no data");
                                }
                                return Ok(result);
                            }
                        }
                    }
                    Err(reason) => Failure::Malformed(reason),
                },
            };

            if self.backoff.policy().is_last_attempt(attempt) {
                warn!(
                    provider = "alpaca",
                    ticker,
                    attempts = attempt + 1,
                    %failure,
                    "retries exhausted"
                );
                return Ok(BarResult::RetryLater);
            }

            let wait = self.backoff.delay(attempt, Duration::ZERO, None);
            warn!(
                provider = "alpaca",
                ticker,
                attempt = attempt + 1,
                max_retries = self.backoff.policy().max_retries,
                wait_ms = wait.as_millis() as u64,
                %failure,
                "request failed, backing off"
            );
            self.limiter.bump(wait);
            attempt += 1;
        }
    }

    fn supports_extended_hours(&self) -> bool {
        true
    }

    fn min_request_interval(&self) -> Duration {
        self.limiter.min_interval()
    }
}
