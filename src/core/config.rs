//! Broker configuration.
//!
//! Loaded from `<root>/aquilon.toml` when the file exists; every key is
//! optional and falls back to the defaults below.

use crate::core::error::AquilonError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const CONFIG_FILE_NAME: &str = "aquilon.toml";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct BrokerConfig {
    /// Database file name, relative to the broker root.
    pub database: String,
    /// Network environment used when a caller does not name one.
    pub default_network_environment: String,
    /// DNS environment considered "internal".
    pub default_dns_environment: String,
    /// Maximum number of alias hops from an alias to its final target.
    pub max_alias_depth: usize,
    pub busy_timeout_secs: u64,
    /// Append one line per broker session to `broker.events.jsonl`.
    pub audit_log: bool,
    /// Short-name prefix for generated dynamic DHCP stubs.
    pub dynamic_stub_prefix: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            database: "aquilon.db".to_string(),
            default_network_environment: "internal".to_string(),
            default_dns_environment: "internal".to_string(),
            max_alias_depth: 4,
            busy_timeout_secs: 5,
            audit_log: true,
            dynamic_stub_prefix: "dynamic".to_string(),
        }
    }
}

impl BrokerConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, AquilonError> {
        let config: BrokerConfig =
            toml::from_str(content).map_err(|e| AquilonError::ConfigError(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, AquilonError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reads `<root>/aquilon.toml` if present, defaults otherwise.
    pub fn load_or_default(root: &Path) -> Result<Self, AquilonError> {
        let path = root.join(CONFIG_FILE_NAME);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    fn check(&self) -> Result<(), AquilonError> {
        if self.database.trim().is_empty() {
            return Err(AquilonError::ConfigError(
                "database must not be empty".to_string(),
            ));
        }
        if self.default_network_environment.trim().is_empty()
            || self.default_dns_environment.trim().is_empty()
        {
            return Err(AquilonError::ConfigError(
                "default environments must be named".to_string(),
            ));
        }
        if self.max_alias_depth == 0 {
            return Err(AquilonError::ConfigError(
                "max_alias_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
