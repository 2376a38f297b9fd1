//! Storage backend selection

use serde::{Deserialize, Serialize};

use super::redis::RedisConfig;
use super::shared::SharedConfig;

/// Which backend holds the metric values
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local memory
    #[default]
    Memory,
    /// Memory-mapped segment shared between processes on one host
    Shared,
    /// Redis server shared between hosts
    Redis,
}

/// Storage section of the configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default)]
    pub shared: SharedConfig,

    #[serde(default)]
    pub redis: RedisConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_memory_backend() {
        let config: StorageConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.backend, BackendKind::Memory);
    }

    #[test]
    fn test_parses_backend_sections() {
        let yaml = r#"
backend: redis
redis:
  redis_url: "redis://cache:6379"
  redis_key_prefix: "svc"
shared:
  capacity: 64
"#;
        let config: StorageConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.backend, BackendKind::Redis);
        assert_eq!(config.redis.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.redis.redis_key_prefix, "svc");
        assert_eq!(config.shared.capacity, 64);
    }

    #[test]
    fn test_rejects_unknown_backend() {
        let result: Result<StorageConfig, _> = serde_yaml::from_str("backend: apcu");
        assert!(result.is_err());
    }
}
