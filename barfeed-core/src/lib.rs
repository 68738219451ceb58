//! barfeed core: historical OHLCV bars from Alpaca, Polygon (Massive) and
//! Interactive Brokers behind one provider contract.
//!
//! - Domain types (bars, granularity, window endpoints)
//! - Per-vendor providers with request pacing and backoff
//! - Tri-state fetch result distinguishing "no data" from "try again"
//! - Provider factory, configuration and batch fetching

pub mod data;
pub mod domain;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: providers can move to worker threads and shared
    /// plumbing can sit behind an `Arc`.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::OhlcvBar>();
        require_sync::<domain::OhlcvBar>();
        require_send::<domain::WindowTime>();
        require_sync::<domain::WindowTime>();
        require_send::<data::BarResult>();
        require_sync::<data::BarResult>();

        require_send::<data::AlpacaProvider>();
        require_send::<data::PolygonProvider>();
        require_send::<data::IbProvider>();
        require_send::<Box<dyn data::BarProvider>>();
        require_send::<std::sync::Mutex<Box<dyn data::BarProvider>>>();
        require_sync::<std::sync::Mutex<Box<dyn data::BarProvider>>>();

        require_send::<data::ReqwestTransport>();
        require_sync::<data::ReqwestTransport>();
        require_sync::<data::ManualClock>();
        require_send::<data::ProviderError>();
    }

    /// `fetch` needs exclusive access, so a shared provider must be locked.
    #[test]
    fn fetch_requires_exclusive_borrow() {
        fn _check(
            p: &mut dyn data::BarProvider,
            start: domain::WindowTime,
            end: domain::WindowTime,
        ) -> Result<data::BarResult, data::ProviderError> {
            p.fetch("AAPL", start, end, domain::Granularity::Minute)
        }
    }
}
