//! Configuration module for warden.

use crate::error::{Result, WardenError};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Main configuration for a warden node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Lock service configuration.
    pub service: ServiceConfig,
    /// Observability configuration.
    pub observability: ObservabilityConfig,
}

impl WardenConfig {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| WardenError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = serde_json::from_str(&content)
            .map_err(|e| WardenError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.service.shards == 0 {
            return Err(WardenError::InvalidConfig {
                field: "service.shards".to_string(),
                reason: "Shard count must be non-zero".to_string(),
            });
        }

        if self.service.shutdown_grace.is_zero() {
            return Err(WardenError::InvalidConfig {
                field: "service.shutdown_grace".to_string(),
                reason: "Shutdown grace period must be non-zero".to_string(),
            });
        }

        Ok(())
    }

    /// Create a minimal development configuration.
    pub fn development() -> Self {
        Self {
            service: ServiceConfig {
                shards: 1,
                shutdown_grace: Duration::from_secs(1),
            },
            observability: ObservabilityConfig {
                metrics_enabled: false,
                metrics_addr: "127.0.0.1:9090".parse().expect("valid socket address"),
                log_level: "debug".to_string(),
                json_logs: false,
            },
        }
    }
}

/// Lock service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Number of single-writer dispatch shards. Locks are partitioned
    /// across shards by identity; one shard processes its locks serially.
    pub shards: usize,
    /// How long shutdown waits for shards to drain.
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            shards: 8,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable Prometheus metrics.
    pub metrics_enabled: bool,
    /// Metrics bind address.
    pub metrics_addr: SocketAddr,
    /// Log level.
    pub log_level: String,
    /// Enable JSON logging.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: true,
            metrics_addr: "0.0.0.0:9090".parse().expect("valid socket address"),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Serde helper for Duration using humantime format.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}ms", duration.as_millis()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    fn parse_duration(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        } else if let Some(s_val) = s.strip_suffix('s') {
            s_val
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| e.to_string())
        } else if let Some(m) = s.strip_suffix('m') {
            m.parse::<u64>()
                .map(|v| Duration::from_secs(v * 60))
                .map_err(|e| e.to_string())
        } else {
            s.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|e| e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WardenConfig::default();
        assert_eq!(config.service.shards, 8);
        assert!(config.observability.metrics_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_development_config() {
        let config = WardenConfig::development();
        assert_eq!(config.service.shards, 1);
        assert!(!config.observability.metrics_enabled);
    }

    #[test]
    fn test_zero_shards_rejected() {
        let mut config = WardenConfig::default();
        config.service.shards = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.json");
        let config = WardenConfig::development();
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = WardenConfig::from_file(&path).unwrap();
        assert_eq!(loaded.service.shards, 1);
        assert!(!loaded.observability.metrics_enabled);
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warden.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(WardenConfig::from_file(&path).is_err());
    }

    #[test]
    fn test_duration_roundtrip() {
        let config = ServiceConfig {
            shards: 2,
            shutdown_grace: Duration::from_millis(1500),
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ServiceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.shutdown_grace, Duration::from_millis(1500));
    }
}
