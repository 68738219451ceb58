//! Resolve a backend name to a configured provider instance.

use super::alpaca::AlpacaProvider;
use super::config::{process_env, AlpacaConfig, DataConfig, EnvLookup, IbConfig, PolygonConfig};
use super::ib::IbProvider;
use super::polygon::PolygonProvider;
use super::provider::{BarProvider, ProviderError};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Names listed in the unknown-backend error.
pub const VALID_BACKENDS: &str = "polygon, alpaca, ib";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Alpaca,
    Polygon,
    Ib,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::Alpaca, ProviderKind::Polygon, ProviderKind::Ib];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Alpaca => "alpaca",
            ProviderKind::Polygon => "polygon",
            ProviderKind::Ib => "ib",
        }
    }

    /// Other names accepted for this backend.
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            ProviderKind::Alpaca => &[],
            ProviderKind::Polygon => &["massive"],
            ProviderKind::Ib => &["ibkr", "interactive_brokers"],
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "alpaca" => Ok(ProviderKind::Alpaca),
            "polygon" | "massive" => Ok(ProviderKind::Polygon),
            "ib" | "ibkr" | "interactive_brokers" => Ok(ProviderKind::Ib),
            _ => Err(ProviderError::UnknownBackend {
                name: s.to_string(),
                valid: VALID_BACKENDS.to_string(),
            }),
        }
    }
}

/// Build the provider for `kind` from file settings overlaid with `env`.
///
/// Credentials are not checked here; a provider without them fails on its
/// first fetch.
pub fn build_provider(
    kind: ProviderKind,
    file: &DataConfig,
    env: EnvLookup,
) -> Result<Box<dyn BarProvider>, ProviderError> {
    debug!(backend = %kind, "building provider");
    Ok(match kind {
        ProviderKind::Alpaca => {
            Box::new(AlpacaProvider::new(AlpacaConfig::resolve(&file.alpaca, env)?)?)
        }
        ProviderKind::Polygon => {
            Box::new(PolygonProvider::new(PolygonConfig::resolve(&file.polygon, env)?)?)
        }
        ProviderKind::Ib => Box::new(IbProvider::new(IbConfig::resolve(&file.ib, env)?)),
    })
}

/// Resolve `name` (or, when absent, `DATA_BACKEND` / the file / `alpaca`)
/// to a provider.
pub fn provider_from_name(
    name: Option<&str>,
    file: &DataConfig,
    env: EnvLookup,
) -> Result<Box<dyn BarProvider>, ProviderError> {
    let name = match name {
        Some(n) => n.to_string(),
        None => file.backend_name(env),
    };
    build_provider(name.parse()?, file, env)
}

/// Provider selected and configured purely from the process environment.
pub fn provider_from_env() -> Result<Box<dyn BarProvider>, ProviderError> {
    provider_from_name(None, &DataConfig::default(), &process_env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::config::map_env;
    use std::collections::HashMap;

    #[test]
    fn parses_names_and_aliases_case_insensitively() {
        assert_eq!("alpaca".parse::<ProviderKind>().unwrap(), ProviderKind::Alpaca);
        assert_eq!("Polygon".parse::<ProviderKind>().unwrap(), ProviderKind::Polygon);
        assert_eq!("MASSIVE".parse::<ProviderKind>().unwrap(), ProviderKind::Polygon);
        assert_eq!(" ib ".parse::<ProviderKind>().unwrap(), ProviderKind::Ib);
        assert_eq!("IBKR".parse::<ProviderKind>().unwrap(), ProviderKind::Ib);
    }

    #[test]
    fn unknown_name_lists_valid_options() {
        let err = "yahoo".parse::<ProviderKind>().unwrap_err();
        assert!(matches!(err, ProviderError::UnknownBackend { .. }));
        let msg = err.to_string();
        assert!(msg.contains("yahoo"));
        assert!(msg.contains("polygon, alpaca, ib"));
    }

    #[test]
    fn every_alias_round_trips() {
        for kind in ProviderKind::ALL {
            assert_eq!(kind.as_str().parse::<ProviderKind>().unwrap(), kind);
            for alias in kind.aliases() {
                assert_eq!(alias.parse::<ProviderKind>().unwrap(), kind);
            }
        }
    }

    #[test]
    fn default_backend_is_alpaca() {
        let env = HashMap::new();
        let p = provider_from_name(None, &DataConfig::default(), &map_env(&env)).unwrap();
        assert_eq!(p.name(), "alpaca");
        assert_eq!(p.min_request_interval(), std::time::Duration::from_millis(300));
    }

    #[test]
    fn env_selects_backend_and_tunables() {
        let env: HashMap<String, String> = [
            ("DATA_BACKEND", "massive"),
            ("MASSIVE_RATE_LIMIT_DELAY", "0.5"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let p = provider_from_name(None, &DataConfig::default(), &map_env(&env)).unwrap();
        assert_eq!(p.name(), "polygon");
        assert_eq!(p.min_request_interval(), std::time::Duration::from_millis(500));
    }

    #[test]
    fn explicit_name_beats_environment() {
        let env: HashMap<String, String> =
            [("DATA_BACKEND".to_string(), "polygon".to_string())].into();
        let p = provider_from_name(Some("ib"), &DataConfig::default(), &map_env(&env)).unwrap();
        assert_eq!(p.name(), "ib");
        assert!(p.supports_extended_hours());
    }

    #[test]
    fn bad_env_value_is_config_error() {
        let env: HashMap<String, String> =
            [("ALPACA_MAX_RETRIES".to_string(), "lots".to_string())].into();
        let err = provider_from_name(Some("alpaca"), &DataConfig::default(), &map_env(&env))
            .err()
            .unwrap();
        assert!(matches!(err, ProviderError::Config(_)));
    }
}
