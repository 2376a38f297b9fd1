// Storage module
//
// Interchangeable backends that accumulate metric values per label
// combination and aggregate them into metric families on collection.

use std::sync::Arc;

pub mod aggregate;
pub mod config;
pub mod error;
pub mod memory;
pub mod redis;
pub mod shared;
pub mod telemetry;
pub mod traits;

pub use config::{BackendKind, StorageConfig};
pub use error::StorageError;
pub use memory::InMemoryStore;
pub use self::redis::{RedisConfig, RedisStore};
pub use shared::{SharedConfig, SharedStore};
pub use traits::{MetricMeta, Store};

/// Builds the backend selected by `config`
///
/// # Errors
///
/// Propagates the backend's own construction errors: configuration
/// problems, segment I/O failures, or Redis connection failures.
pub fn build_store(config: &StorageConfig) -> Result<Arc<dyn Store>, StorageError> {
    let store: Arc<dyn Store> = match config.backend {
        BackendKind::Memory => Arc::new(InMemoryStore::new()),
        BackendKind::Shared => Arc::new(SharedStore::open(&config.shared)?),
        BackendKind::Redis => Arc::new(RedisStore::new(config.redis.clone())?),
    };
    tracing::info!(backend = store.backend_name(), "Metric storage ready");
    Ok(store)
}
