//! Watchlist: named groups of tickers, stored as TOML.
//!
//! ```toml
//! [groups]
//! megacaps = ["AAPL", "MSFT", "NVDA"]
//! etfs = ["SPY", "QQQ"]
//! ```

use super::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Watchlist {
    pub groups: BTreeMap<String, Vec<String>>,
}

impl Watchlist {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(format!("watchlist: {e}")))
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups.keys().map(|s| s.as_str()).collect()
    }

    /// Tickers of one group, or of every group when `group` is `None`.
    ///
    /// Symbols are trimmed and upper-cased; each appears once, at its first
    /// position.
    pub fn tickers(&self, group: Option<&str>) -> Result<Vec<String>, ConfigError> {
        let lists: Vec<&Vec<String>> = match group {
            Some(name) => vec![self.groups.get(name).ok_or_else(|| ConfigError::InvalidValue {
                key: "group".into(),
                value: name.to_string(),
                reason: format!("not in watchlist (have: {})", self.group_names().join(", ")),
            })?],
            None => self.groups.values().collect(),
        };

        let mut seen = BTreeSet::new();
        Ok(lists
            .into_iter()
            .flatten()
            .map(|t| t.trim().to_uppercase())
            .filter(|t| !t.is_empty() && seen.insert(t.clone()))
            .collect())
    }
}
