// Shared segment configuration module

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Settings of the memory-mapped cross-process store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Segment file; every cooperating process must use the same path
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// Number of slots when the segment is created (default: 4096)
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Key prefix for entries owned by this library (default: "masu")
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            capacity: default_capacity(),
            key_prefix: default_key_prefix(),
        }
    }
}

fn default_path() -> PathBuf {
    let shm = PathBuf::from("/dev/shm");
    if shm.is_dir() {
        shm.join("masu.seg")
    } else {
        std::env::temp_dir().join("masu.seg")
    }
}

fn default_capacity() -> usize {
    4096
}

fn default_key_prefix() -> String {
    "masu".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_create_shared_config_from_yaml() {
        let yaml = r#"
path: "/tmp/metrics.seg"
capacity: 128
key_prefix: "app"
"#;
        let config: SharedConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.path, PathBuf::from("/tmp/metrics.seg"));
        assert_eq!(config.capacity, 128);
        assert_eq!(config.key_prefix, "app");
    }

    #[test]
    fn test_defaults_apply_to_empty_yaml() {
        let config: SharedConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.capacity, 4096);
        assert_eq!(config.key_prefix, "masu");
        assert!(config.path.ends_with("masu.seg"));
    }
}
