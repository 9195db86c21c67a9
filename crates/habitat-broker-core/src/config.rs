//! broker.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Namespace holding the instance registry.
pub const DEFAULT_REGISTRY_NAMESPACE: &str = "habitat-service-broker-configuration";
/// Name of the registry config map.
pub const DEFAULT_REGISTRY_CONFIG_MAP: &str = "habitat-service-broker";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub broker: BrokerSection,
    pub registry: RegistrySection,
    pub credentials: CredentialsSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSection {
    /// Mark responses asynchronous when the caller accepts incomplete results.
    #[serde(rename = "async")]
    pub async_mode: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    pub namespace: String,
    pub config_map: String,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_REGISTRY_NAMESPACE.to_string(),
            config_map: DEFAULT_REGISTRY_CONFIG_MAP.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsSection {
    /// Wall-clock window for issuing or verifying a secret.
    pub attempt_window_secs: u64,
    /// Pause between attempts.
    pub poll_interval_ms: u64,
}

impl Default for CredentialsSection {
    fn default() -> Self {
        Self {
            attempt_window_secs: 15,
            poll_interval_ms: 1000,
        }
    }
}

impl CredentialsSection {
    pub fn attempt_window(&self) -> Duration {
        Duration::from_secs(self.attempt_window_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl BrokerConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BrokerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
