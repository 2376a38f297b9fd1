// Configuration module

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::logging::LoggingConfig;
use crate::pushgateway::PushGatewayConfig;
use crate::storage::{BackendKind, StorageConfig};

/// Top-level configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub pushgateway: PushGatewayConfig,
}

impl Config {
    pub fn from_yaml_with_env(yaml: &str) -> Result<Self, String> {
        // Replace ${VAR_NAME} with environment variable values
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").map_err(|e| e.to_string())?;

        for caps in re.captures_iter(yaml) {
            let var_name = &caps[1];
            std::env::var(var_name).map_err(|_| {
                format!(
                    "Environment variable '{}' is referenced but not set",
                    var_name
                )
            })?;
        }

        let substituted = re.replace_all(yaml, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        });

        serde_yaml::from_str(&substituted).map_err(|e| e.to_string())
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let yaml = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        Self::from_yaml_with_env(&yaml)
    }

    /// Checks the settings of the selected backend and the push gateway
    pub fn validate(&self) -> Result<(), String> {
        match self.storage.backend {
            BackendKind::Memory => {}
            BackendKind::Shared => {
                let shared = &self.storage.shared;
                if shared.capacity == 0 {
                    return Err("storage.shared.capacity must be greater than 0".to_string());
                }
                if shared.key_prefix.is_empty() || shared.key_prefix.contains(':') {
                    return Err(format!(
                        "storage.shared.key_prefix '{}' must be non-empty and free of ':'",
                        shared.key_prefix
                    ));
                }
                if shared.path.as_os_str().is_empty() {
                    return Err("storage.shared.path cannot be empty".to_string());
                }
            }
            BackendKind::Redis => {
                let redis = &self.storage.redis;
                match redis.redis_url.as_deref() {
                    None | Some("") => {
                        return Err("storage.redis.redis_url is required for the redis backend"
                            .to_string())
                    }
                    Some(url) if !url.starts_with("redis://") && !url.starts_with("rediss://") => {
                        return Err(format!(
                            "storage.redis.redis_url '{}' must start with redis:// or rediss://",
                            url
                        ));
                    }
                    Some(_) => {}
                }
                if redis.redis_key_prefix.is_empty() {
                    return Err("storage.redis.redis_key_prefix cannot be empty".to_string());
                }
                if redis.connection_timeout_ms == 0 || redis.operation_timeout_ms == 0 {
                    return Err("storage.redis timeouts must be greater than 0".to_string());
                }
            }
        }

        if self.pushgateway.address.is_empty() {
            return Err("pushgateway.address cannot be empty".to_string());
        }
        if self.pushgateway.timeout_ms == 0 {
            return Err("pushgateway.timeout_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = Config::from_yaml_with_env("{}").unwrap();
        assert_eq!(config.storage.backend, BackendKind::Memory);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.pushgateway.address, "http://127.0.0.1:9091");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_can_be_loaded_from_file_path() {
        let mut temp_file = NamedTempFile::new().unwrap();
        let config_yaml = r#"
storage:
  backend: shared
  shared:
    path: /tmp/masu-test.seg
    capacity: 256
    key_prefix: app
logging:
  level: debug
  json: true
pushgateway:
  address: "http://gateway:9091"
  timeout_ms: 1500
"#;
        temp_file.write_all(config_yaml.as_bytes()).unwrap();
        temp_file.flush().unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();
        assert_eq!(config.storage.backend, BackendKind::Shared);
        assert_eq!(config.storage.shared.capacity, 256);
        assert_eq!(config.storage.shared.key_prefix, "app");
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert_eq!(config.pushgateway.timeout_ms, 1500);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_is_reported() {
        let result = Config::from_file("/nonexistent/masu.yaml");
        assert!(result.unwrap_err().contains("Failed to read config file"));
    }

    #[test]
    fn test_can_substitute_env_var_in_redis_url() {
        std::env::set_var("MASU_TEST_REDIS_URL", "redis://cache.example.com:6379");

        let yaml = r#"
storage:
  backend: redis
  redis:
    redis_url: ${MASU_TEST_REDIS_URL}
"#;
        let config = Config::from_yaml_with_env(yaml).unwrap();
        assert_eq!(
            config.storage.redis.redis_url,
            Some("redis://cache.example.com:6379".to_string())
        );
        assert!(config.validate().is_ok());

        std::env::remove_var("MASU_TEST_REDIS_URL");
    }

    #[test]
    fn test_env_var_substitution_fails_when_missing() {
        std::env::remove_var("MASU_NONEXISTENT_VAR");

        let yaml = r#"
storage:
  redis:
    redis_password: ${MASU_NONEXISTENT_VAR}
"#;
        let result = Config::from_yaml_with_env(yaml);
        assert!(result
            .unwrap_err()
            .contains("Environment variable 'MASU_NONEXISTENT_VAR' is referenced but not set"));
    }

    #[test]
    fn test_validation_requires_redis_url() {
        let config = Config::from_yaml_with_env("storage:\n  backend: redis\n").unwrap();
        assert!(config.validate().unwrap_err().contains("redis_url"));

        let config = Config::from_yaml_with_env(
            "storage:\n  backend: redis\n  redis:\n    redis_url: http://nope\n",
        )
        .unwrap();
        assert!(config.validate().unwrap_err().contains("redis://"));
    }

    #[test]
    fn test_validation_rejects_bad_shared_settings() {
        let config = Config::from_yaml_with_env(
            "storage:\n  backend: shared\n  shared:\n    capacity: 0\n",
        )
        .unwrap();
        assert!(config.validate().unwrap_err().contains("capacity"));

        let config = Config::from_yaml_with_env(
            "storage:\n  backend: shared\n  shared:\n    key_prefix: \"a:b\"\n",
        )
        .unwrap();
        assert!(config.validate().unwrap_err().contains("key_prefix"));
    }

    #[test]
    fn test_validation_ignores_unselected_backends() {
        let config = Config::from_yaml_with_env(
            "storage:\n  backend: memory\n  shared:\n    capacity: 0\n",
        )
        .unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_unknown_backend() {
        assert!(Config::from_yaml_with_env("storage:\n  backend: etcd\n").is_err());
    }
}
