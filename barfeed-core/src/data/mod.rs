//! Vendor providers and the machinery they share

pub mod alpaca;
pub mod backoff;
pub mod batch;
pub mod clock;
pub mod config;
pub mod factory;
pub mod ib;
pub mod normalize;
pub mod polygon;
pub mod provider;
pub mod rate_limiter;
pub mod transport;
pub mod watchlist;

pub use alpaca::AlpacaProvider;
pub use backoff::{parse_retry_after, Backoff, BackoffPolicy, Jitter};
pub use batch::{fetch_batch, BatchProgress, BatchSummary, LogProgress, NoProgress};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{AlpacaConfig, ConfigError, DataConfig, IbConfig, PolygonConfig, ProviderSettings};
pub use factory::{build_provider, provider_from_env, provider_from_name, ProviderKind};
pub use ib::{HistoricalSession, IbProvider, SessionError, TwsSession};
pub use normalize::HostZone;
pub use polygon::PolygonProvider;
pub use provider::{BarProvider, BarResult, ProviderError};
pub use rate_limiter::RateLimiter;
pub use transport::{HttpTransport, ReqwestTransport, ScriptedTransport, TransportError};
pub use watchlist::Watchlist;
