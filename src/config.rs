//! Router configuration, loaded from TOML.

use crate::cluster::DEFAULT_UNINITIALIZED_CURSOR;
use crate::error::{Result, RouterError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub transport: TransportConfig,
    pub scan: ScanConfig,
    pub relocation: RelocationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// `host:port` of nodes used to discover the topology
    pub seeds: Vec<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            seeds: vec!["127.0.0.1:7000".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub connect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3000,
        }
    }
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Cursor value treated as "not started" and sent as `0`
    pub uninitialized_cursor: u64,
    /// `COUNT` hint for each page; 0 leaves it to the server
    pub default_count: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            uninitialized_cursor: DEFAULT_UNINITIALIZED_CURSOR,
            default_count: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelocationConfig {
    /// How many times `DEL` of the source is tried after a cross-slot restore
    pub delete_attempts: u32,
}

impl Default for RelocationConfig {
    fn default() -> Self {
        Self { delete_attempts: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RouterError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| RouterError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cluster.seeds.is_empty() {
            return Err(RouterError::Config(
                "cluster.seeds must list at least one node".to_string(),
            ));
        }
        for seed in &self.cluster.seeds {
            let valid = seed
                .rsplit_once(':')
                .map(|(host, port)| !host.is_empty() && port.parse::<u16>().map_or(false, |p| p > 0))
                .unwrap_or(false);
            if !valid {
                return Err(RouterError::Config(format!(
                    "Invalid seed address '{}', expected host:port",
                    seed
                )));
            }
        }
        if self.relocation.delete_attempts == 0 {
            return Err(RouterError::Config(
                "relocation.delete_attempts must be at least 1".to_string(),
            ));
        }
        if self.transport.connect_timeout_ms == 0 {
            return Err(RouterError::Config(
                "transport.connect_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scan.uninitialized_cursor, 101010101010101010);
        assert_eq!(config.relocation.delete_attempts, 2);
        assert_eq!(config.transport.connect_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml_str(
            r#"
[cluster]
seeds = ["10.0.0.1:7000", "10.0.0.2:7000"]

[scan]
default_count = 500
"#,
        )
        .unwrap();
        assert_eq!(config.cluster.seeds.len(), 2);
        assert_eq!(config.scan.default_count, 500);
        assert_eq!(config.scan.uninitialized_cursor, DEFAULT_UNINITIALIZED_CURSOR);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::from_toml_str("[cluster]\nseeds = []\n").unwrap_err();
        assert!(matches!(err, RouterError::Config(_)));

        let err = Config::from_toml_str("[cluster]\nseeds = [\"nohost\"]\n").unwrap_err();
        assert!(err.to_string().contains("nohost"));

        let err = Config::from_toml_str("[relocation]\ndelete_attempts = 0\n").unwrap_err();
        assert!(err.to_string().contains("delete_attempts"));

        assert!(Config::from_toml_str("[scan]\ndefault_count = \"many\"\n").is_err());
    }
}
