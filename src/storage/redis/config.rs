// Redis store configuration module

use serde::{Deserialize, Serialize};

/// Redis-specific storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Optional password for Redis authentication
    #[serde(default)]
    pub redis_password: Option<String>,

    /// Redis database number (default: 0)
    #[serde(default = "default_redis_db")]
    pub redis_db: u32,

    /// Key prefix for every hash and index set (default: "masu")
    #[serde(default = "default_redis_key_prefix")]
    pub redis_key_prefix: String,

    /// Connection timeout in milliseconds (default: 5000 = 5 seconds)
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Read/write timeout in milliseconds (default: 2000 = 2 seconds)
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            redis_password: None,
            redis_db: default_redis_db(),
            redis_key_prefix: default_redis_key_prefix(),
            connection_timeout_ms: default_connection_timeout_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
        }
    }
}

fn default_redis_db() -> u32 {
    0
}

fn default_redis_key_prefix() -> String {
    "masu".to_string()
}

fn default_connection_timeout_ms() -> u64 {
    5000 // 5 seconds
}

fn default_operation_timeout_ms() -> u64 {
    2000 // 2 seconds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_create_redis_config_from_yaml() {
        let yaml = r#"
redis_url: "redis://localhost:6379"
redis_password: "secret"
redis_db: 1
redis_key_prefix: "test"
connection_timeout_ms: 3000
operation_timeout_ms: 1000
"#;

        let config: RedisConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.redis_url, Some("redis://localhost:6379".to_string()));
        assert_eq!(config.redis_password, Some("secret".to_string()));
        assert_eq!(config.redis_db, 1);
        assert_eq!(config.redis_key_prefix, "test");
        assert_eq!(config.connection_timeout_ms, 3000);
        assert_eq!(config.operation_timeout_ms, 1000);
    }

    #[test]
    fn test_config_defaults() {
        let config: RedisConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.redis_url.is_none());
        assert!(config.redis_password.is_none());
        assert_eq!(config.redis_db, 0);
        assert_eq!(config.redis_key_prefix, "masu");
        assert_eq!(config.connection_timeout_ms, 5000);
        assert_eq!(config.operation_timeout_ms, 2000);
    }
}
