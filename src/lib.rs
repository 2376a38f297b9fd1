// Masu instrumentation client library

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod names;
pub mod pushgateway;
pub mod registry;
pub mod render;
pub mod sample;
pub mod storage;

pub use error::{MetricsError, Result};
pub use metrics::{Counter, Gauge, Histogram};
pub use registry::CollectorRegistry;
pub use render::{render_text, MIME_TYPE};
pub use sample::{MetricFamilySamples, MetricType, Sample};
pub use storage::{InMemoryStore, RedisStore, SharedStore, Store, StorageError};
