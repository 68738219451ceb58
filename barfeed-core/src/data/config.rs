//! Provider configuration: per-vendor defaults, TOML file overrides and
//! environment overrides, in that order of precedence.
//!
//! Environment access goes through an [`EnvLookup`] so tests can pass a map
//! instead of mutating the process environment.

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_BACKEND: &str = "alpaca";
pub const ALPACA_BASE_URL: &str = "https://data.alpaca.markets";
pub const POLYGON_BASE_URL: &str = "https://api.polygon.io";

/// Environment variable lookup.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Reads the process environment, treating blank values as unset.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Lookup over a fixed map.
pub fn map_env(map: &HashMap<String, String>) -> impl Fn(&str) -> Option<String> + '_ {
    move |key| map.get(key).cloned()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(String),

    #[error("invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Resolved tunables for one provider instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderSettings {
    /// Pacing floor between consecutive requests.
    pub rate_limit_delay: Duration,
    /// Attempts per request, including the first.
    pub max_retries: u32,
    pub timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Vendor endpoint. For IB this is the gateway's API socket, `host:port`.
    pub base_url: String,
    /// Zone the exchange keeps its wall clock in.
    pub exchange_tz: Tz,
}

impl ProviderSettings {
    pub fn alpaca_defaults() -> Self {
        Self {
            rate_limit_delay: Duration::from_millis(300),
            max_retries: 5,
            timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            base_url: ALPACA_BASE_URL.to_string(),
            exchange_tz: chrono_tz::America::New_York,
        }
    }

    pub fn polygon_defaults() -> Self {
        Self {
            rate_limit_delay: Duration::from_secs(12),
            max_retries: 8,
            timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(2),
            backoff_cap: Duration::from_secs(120),
            base_url: POLYGON_BASE_URL.to_string(),
            exchange_tz: chrono_tz::America::New_York,
        }
    }

    pub fn ib_defaults(host: &str, port: u16) -> Self {
        Self {
            rate_limit_delay: Duration::from_millis(500),
            max_retries: 1,
            timeout: Duration::from_secs(60),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(60),
            base_url: format!("{host}:{port}"),
            exchange_tz: chrono_tz::America::New_York,
        }
    }
}

/// Optional overrides for [`ProviderSettings`], as found in a config file
/// table or the environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettingsOverrides {
    pub rate_limit_delay_s: Option<f64>,
    pub max_retries: Option<u32>,
    pub timeout_s: Option<f64>,
    pub backoff_base_s: Option<f64>,
    pub backoff_cap_s: Option<f64>,
    pub base_url: Option<String>,
    pub exchange_tz: Option<String>,
}

impl SettingsOverrides {
    /// Collect `{PREFIX}_RATE_LIMIT_DELAY`, `{PREFIX}_MAX_RETRIES`,
    /// `{PREFIX}_TIMEOUT_S`, `{PREFIX}_BACKOFF_BASE_S`, `{PREFIX}_BACKOFF_CAP_S`,
    /// `{PREFIX}_BASE_URL` and `{PREFIX}_EXCHANGE_TZ`.
    pub fn from_env(prefix: &str, env: EnvLookup) -> Result<Self, ConfigError> {
        Ok(Self {
            rate_limit_delay_s: env_parse(env, &format!("{prefix}_RATE_LIMIT_DELAY"))?,
            max_retries: env_parse(env, &format!("{prefix}_MAX_RETRIES"))?,
            timeout_s: env_parse(env, &format!("{prefix}_TIMEOUT_S"))?,
            backoff_base_s: env_parse(env, &format!("{prefix}_BACKOFF_BASE_S"))?,
            backoff_cap_s: env_parse(env, &format!("{prefix}_BACKOFF_CAP_S"))?,
            base_url: env(&format!("{prefix}_BASE_URL")),
            exchange_tz: env(&format!("{prefix}_EXCHANGE_TZ")),
        })
    }

    pub fn apply(&self, settings: &mut ProviderSettings) -> Result<(), ConfigError> {
        if let Some(v) = self.rate_limit_delay_s {
            settings.rate_limit_delay = seconds("rate_limit_delay_s", v)?;
        }
        if let Some(v) = self.max_retries {
            if v == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "max_retries".into(),
                    value: v.to_string(),
                    reason: "must allow at least one attempt".into(),
                });
            }
            settings.max_retries = v;
        }
        if let Some(v) = self.timeout_s {
            settings.timeout = seconds("timeout_s", v)?;
        }
        if let Some(v) = self.backoff_base_s {
            settings.backoff_base = seconds("backoff_base_s", v)?;
        }
        if let Some(v) = self.backoff_cap_s {
            settings.backoff_cap = seconds("backoff_cap_s", v)?;
        }
        if let Some(url) = &self.base_url {
            settings.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(tz) = &self.exchange_tz {
            settings.exchange_tz = tz.parse::<Tz>().map_err(|e| ConfigError::InvalidValue {
                key: "exchange_tz".into(),
                value: tz.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

fn seconds(key: &str, v: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(v).map_err(|_| ConfigError::InvalidValue {
        key: key.into(),
        value: v.to_string(),
        reason: "expected a non-negative number of seconds".into(),
    })
}

fn env_parse<T: std::str::FromStr>(env: EnvLookup, key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: fmt::Display,
{
    match env(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.into(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

// ── Config file ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlpacaSection {
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    #[serde(flatten)]
    pub overrides: SettingsOverrides,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolygonSection {
    pub api_key: Option<String>,
    #[serde(flatten)]
    pub overrides: SettingsOverrides,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IbSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub client_id: Option<i32>,
    #[serde(flatten)]
    pub overrides: SettingsOverrides,
}

/// On-disk configuration. Every field is optional; environment variables
/// still win over anything set here.
///
/// ```toml
/// backend = "polygon"
///
/// [polygon]
/// rate_limit_delay_s = 12.0
/// max_retries = 8
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub backend: Option<String>,
    pub alpaca: AlpacaSection,
    pub polygon: PolygonSection,
    pub ib: IbSection,
}

impl DataConfig {
    /// Load from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Backend selection: `DATA_BACKEND`, then the file, then the default.
    pub fn backend_name(&self, env: EnvLookup) -> String {
        env("DATA_BACKEND")
            .or_else(|| self.backend.clone())
            .unwrap_or_else(|| DEFAULT_BACKEND.to_string())
    }
}

// ── Resolved per-vendor configs ──────────────────────────────────────

#[derive(Clone, PartialEq)]
pub struct AlpacaConfig {
    pub api_key: Option<String>,
    pub secret_key: Option<String>,
    pub settings: ProviderSettings,
}

impl AlpacaConfig {
    pub fn new(api_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            secret_key: Some(secret_key.into()),
            settings: ProviderSettings::alpaca_defaults(),
        }
    }

    pub fn resolve(file: &AlpacaSection, env: EnvLookup) -> Result<Self, ConfigError> {
        let mut settings = ProviderSettings::alpaca_defaults();
        file.overrides.apply(&mut settings)?;
        SettingsOverrides::from_env("ALPACA", env)?.apply(&mut settings)?;
        Ok(Self {
            api_key: env("ALPACA_API_KEY").or_else(|| file.api_key.clone()),
            secret_key: env("ALPACA_SECRET_KEY").or_else(|| file.secret_key.clone()),
            settings,
        })
    }
}

impl fmt::Debug for AlpacaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlpacaConfig")
            .field("api_key", &redacted(&self.api_key))
            .field("secret_key", &redacted(&self.secret_key))
            .field("settings", &self.settings)
            .finish()
    }
}

#[derive(Clone, PartialEq)]
pub struct PolygonConfig {
    pub api_key: Option<String>,
    pub settings: ProviderSettings,
}

impl PolygonConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            settings: ProviderSettings::polygon_defaults(),
        }
    }

    /// Polygon rebranded as Massive; both key names are honoured, Massive first.
    pub fn resolve(file: &PolygonSection, env: EnvLookup) -> Result<Self, ConfigError> {
        let mut settings = ProviderSettings::polygon_defaults();
        file.overrides.apply(&mut settings)?;
        SettingsOverrides::from_env("MASSIVE", env)?.apply(&mut settings)?;
        Ok(Self {
            api_key: env("MASSIVE_API_KEY")
                .or_else(|| env("POLYGON_API_KEY"))
                .or_else(|| file.api_key.clone()),
            settings,
        })
    }
}

impl fmt::Debug for PolygonConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolygonConfig")
            .field("api_key", &redacted(&self.api_key))
            .field("settings", &self.settings)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IbConfig {
    pub host: String,
    pub port: u16,
    pub client_id: i32,
    pub settings: ProviderSettings,
}

impl Default for IbConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 4002,
            client_id: 1,
            settings: ProviderSettings::ib_defaults("127.0.0.1", 4002),
        }
    }
}

impl IbConfig {
    /// Socket address of TWS or IB Gateway.
    pub fn address(&self) -> &str {
        &self.settings.base_url
    }

    pub fn resolve(file: &IbSection, env: EnvLookup) -> Result<Self, ConfigError> {
        let host = env("IB_HOST")
            .or_else(|| file.host.clone())
            .unwrap_or_else(|| "127.0.0.1".into());
        let port = match env_parse::<u16>(env, "IB_PORT")? {
            Some(p) => p,
            None => file.port.unwrap_or(4002),
        };
        let client_id = match env_parse::<i32>(env, "IB_CLIENT_ID")? {
            Some(c) => c,
            None => file.client_id.unwrap_or(1),
        };

        let mut settings = ProviderSettings::ib_defaults(&host, port);
        file.overrides.apply(&mut settings)?;
        SettingsOverrides::from_env("IB", env)?.apply(&mut settings)?;
        Ok(Self {
            host,
            port,
            client_id,
            settings,
        })
    }
}

fn redacted(secret: &Option<String>) -> &'static str {
    match secret {
        Some(_) => "<redacted>",
        None => "<unset>",
    }
}
