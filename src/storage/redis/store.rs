// Redis store implementation
//
// One hash per metric, one field per series, and one index set per metric
// type so collection never scans the keyspace.

use ::redis::{Client, Commands, Connection, RedisResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

use super::config::RedisConfig;
use super::key::{
    index_key, is_reserved_field, metric_key, parse_series_field, series_field, HistogramField,
    META_FIELD, SUM_MARKER,
};
use super::scripts::{Scripts, BUCKET_MISMATCH};
use crate::sample::{MetricFamilySamples, MetricType};
use crate::storage::aggregate::{
    bucket_index, bucket_index_for_label, bucket_label, sort_families, HistogramAccumulator,
    SeriesAccumulator,
};
use crate::storage::error::StorageError;
use crate::storage::telemetry::StorageTelemetry;
use crate::storage::traits::{MetricMeta, Store};

const BACKEND: &str = "redis";

/// Redis-backed store shared by any number of processes and hosts
///
/// Provides:
/// - One atomic Lua script per instrumentation call
/// - Index sets so `collect()` only reads hashes it owns
/// - Optimistic WATCH/MULTI flush that leaves foreign keys untouched
/// - Lazy reconnection after a dropped connection
pub struct RedisStore {
    /// Redis client used to (re)establish the connection
    client: Client,

    /// Current connection; `None` after a connection-level failure
    connection: Mutex<Option<Connection>>,

    /// Redis configuration
    config: RedisConfig,

    /// Preloaded update scripts
    scripts: Scripts,

    /// Key prefix for all hashes and index sets
    key_prefix: String,
}

impl RedisStore {
    /// Creates a new RedisStore and connects eagerly
    ///
    /// # Errors
    ///
    /// Returns StorageError::Configuration if `redis_url` is missing or the
    /// key prefix is empty, and StorageError::ConnectionFailed if:
    /// - Redis URL is invalid
    /// - Cannot connect to Redis server
    /// - Authentication fails
    /// - Cannot select database
    pub fn new(config: RedisConfig) -> Result<Self, StorageError> {
        let redis_url = config.redis_url.as_ref().ok_or_else(|| {
            StorageError::Configuration("redis_url is required".to_string())
        })?;
        if config.redis_key_prefix.is_empty() {
            return Err(StorageError::Configuration(
                "redis_key_prefix must not be empty".to_string(),
            ));
        }

        let client = Client::open(redis_url.as_str())
            .map_err(|e| StorageError::ConnectionFailed(format!("Invalid Redis URL: {}", e)))?;

        let key_prefix = config.redis_key_prefix.clone();
        let store = Self {
            client,
            connection: Mutex::new(None),
            config,
            scripts: Scripts::new(),
            key_prefix,
        };

        let connection = store.connect()?;
        *store.connection.lock() = Some(connection);
        tracing::info!(
            redis_db = store.config.redis_db,
            key_prefix = %store.key_prefix,
            "Connected to Redis metric storage"
        );
        Ok(store)
    }

    fn connect(&self) -> Result<Connection, StorageError> {
        let connect_timeout = Duration::from_millis(self.config.connection_timeout_ms);
        let operation_timeout = Duration::from_millis(self.config.operation_timeout_ms);

        let mut connection = self
            .client
            .get_connection_with_timeout(connect_timeout)
            .map_err(|e| {
                StorageError::ConnectionFailed(format!("Failed to connect to Redis: {}", e))
            })?;

        let timeouts: RedisResult<()> = connection
            .set_read_timeout(Some(operation_timeout))
            .and_then(|_| connection.set_write_timeout(Some(operation_timeout)));
        timeouts.map_err(|e| {
            StorageError::ConnectionFailed(format!("Failed to set Redis timeouts: {}", e))
        })?;

        if let Some(password) = &self.config.redis_password {
            ::redis::cmd("AUTH")
                .arg(password)
                .query::<()>(&mut connection)
                .map_err(|e| {
                    StorageError::ConnectionFailed(format!("Redis authentication failed: {}", e))
                })?;
        }
        if self.config.redis_db != 0 {
            ::redis::cmd("SELECT")
                .arg(self.config.redis_db)
                .query::<()>(&mut connection)
                .map_err(|e| {
                    StorageError::ConnectionFailed(format!(
                        "Failed to select database {}: {}",
                        self.config.redis_db, e
                    ))
                })?;
        }
        Ok(connection)
    }

    /// Runs `f` on the live connection, reconnecting first if the previous
    /// one failed. Connection-level errors drop the connection.
    fn with_connection<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut Connection) -> RedisResult<T>,
    {
        let mut guard = self.connection.lock();
        if guard.is_none() {
            tracing::info!("Reconnecting to Redis metric storage");
            *guard = Some(self.connect()?);
        }
        let Some(connection) = guard.as_mut() else {
            return Err(StorageError::ConnectionFailed(
                "no Redis connection available".to_string(),
            ));
        };

        match f(connection) {
            Ok(value) => Ok(value),
            Err(err) => {
                let err = StorageError::from(err);
                if matches!(err, StorageError::ConnectionFailed(_)) {
                    tracing::warn!(error = %err, "Dropping broken Redis connection");
                    *guard = None;
                }
                Err(err)
            }
        }
    }

    /// Sends PING to verify Redis is responsive
    pub fn health_check(&self) -> bool {
        self.with_connection(|con| ::redis::cmd("PING").query::<String>(con))
            .map(|reply| reply == "PONG")
            .unwrap_or(false)
    }

    fn update_series(
        &self,
        metric_type: MetricType,
        meta: &MetricMeta,
        label_values: &[String],
        value: f64,
        mode: &str,
    ) -> Result<(), StorageError> {
        let hash = metric_key(&self.key_prefix, metric_type, &meta.name);
        let index = index_key(&self.key_prefix, metric_type);
        let field = series_field(label_values)?;
        let meta_json = serde_json::to_string(meta)?;

        let _timer = StorageTelemetry::global().start_script_timer("update_series");
        self.with_connection(|con| {
            self.scripts
                .update_series
                .key(&hash)
                .key(&index)
                .arg(&field)
                .arg(value.to_string())
                .arg(&meta_json)
                .arg(mode)
                .invoke::<i64>(con)
        })?;
        Ok(())
    }

    fn collect_type(
        &self,
        con: &mut Connection,
        metric_type: MetricType,
        families: &mut Vec<MetricFamilySamples>,
    ) -> Result<(), StorageError> {
        let mut keys: Vec<String> = con.smembers(index_key(&self.key_prefix, metric_type))?;
        keys.sort();
        if keys.is_empty() {
            return Ok(());
        }

        let mut pipe = ::redis::pipe();
        for key in &keys {
            pipe.hgetall(key);
        }
        let hashes: Vec<HashMap<String, String>> = pipe.query(con)?;

        for (key, hash) in keys.iter().zip(hashes) {
            let Some(raw_meta) = hash.get(META_FIELD) else {
                // Indexed but not yet (or no longer) written.
                tracing::debug!(key = %key, "Skipping hash without metadata");
                continue;
            };
            let meta: MetricMeta = serde_json::from_str(raw_meta)?;
            let family = match metric_type {
                MetricType::Counter | MetricType::Gauge => {
                    let mut acc = SeriesAccumulator::new();
                    for (field, value) in &hash {
                        if is_reserved_field(field) {
                            continue;
                        }
                        acc.record(parse_series_field(field)?, parse_number(key, value)?);
                    }
                    acc.into_family(&meta, metric_type)
                }
                MetricType::Histogram => {
                    let mut acc = HistogramAccumulator::new();
                    for (field, value) in &hash {
                        if is_reserved_field(field) {
                            continue;
                        }
                        let field = HistogramField::decode(field)?;
                        let number = parse_number(key, value)?;
                        if field.is_sum() {
                            acc.record_sum(field.label_values, number);
                        } else if let Some(index) =
                            bucket_index_for_label(meta.bucket_bounds(), &field.b)
                        {
                            acc.record_bucket(field.label_values, index, number);
                        } else {
                            tracing::warn!(key = %key, bucket = %field.b, "Skipping unknown bucket");
                        }
                    }
                    acc.into_family(&meta)
                }
            };
            families.push(family);
        }
        Ok(())
    }
}

fn parse_number(key: &str, raw: &str) -> Result<f64, StorageError> {
    raw.parse::<f64>().map_err(|_| {
        StorageError::Backend(format!("non-numeric value '{}' stored in {}", raw, key))
    })
}

impl Store for RedisStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn increment_counter(
        &self,
        meta: &MetricMeta,
        label_values: &[String],
        value: f64,
    ) -> Result<(), StorageError> {
        self.update_series(MetricType::Counter, meta, label_values, value, "add")?;
        StorageTelemetry::global().record_operation(BACKEND, "increment_counter");
        Ok(())
    }

    fn set_gauge(
        &self,
        meta: &MetricMeta,
        label_values: &[String],
        value: f64,
    ) -> Result<(), StorageError> {
        self.update_series(MetricType::Gauge, meta, label_values, value, "set")?;
        StorageTelemetry::global().record_operation(BACKEND, "set_gauge");
        Ok(())
    }

    fn add_to_gauge(
        &self,
        meta: &MetricMeta,
        label_values: &[String],
        value: f64,
    ) -> Result<(), StorageError> {
        self.update_series(MetricType::Gauge, meta, label_values, value, "add")?;
        StorageTelemetry::global().record_operation(BACKEND, "add_to_gauge");
        Ok(())
    }

    fn update_histogram(
        &self,
        meta: &MetricMeta,
        label_values: &[String],
        value: f64,
    ) -> Result<(), StorageError> {
        let bounds = meta.bucket_bounds();
        let hash = metric_key(&self.key_prefix, MetricType::Histogram, &meta.name);
        let index = index_key(&self.key_prefix, MetricType::Histogram);
        let sum_field = HistogramField::new(SUM_MARKER, label_values).encode()?;
        let bucket_field =
            HistogramField::new(bucket_label(bounds, bucket_index(bounds, value)), label_values)
                .encode()?;
        let meta_json = serde_json::to_string(meta)?;
        let buckets_json = serde_json::to_string(bounds)?;

        let _timer = StorageTelemetry::global().start_script_timer("update_histogram");
        let result = self.with_connection(|con| {
            self.scripts
                .update_histogram
                .key(&hash)
                .key(&index)
                .arg(&sum_field)
                .arg(&bucket_field)
                .arg(value.to_string())
                .arg(&meta_json)
                .arg(&buckets_json)
                .invoke::<i64>(con)
        });
        match result {
            Ok(_) => {
                StorageTelemetry::global().record_operation(BACKEND, "update_histogram");
                Ok(())
            }
            Err(StorageError::Backend(msg)) if msg.contains(BUCKET_MISMATCH) => {
                Err(StorageError::BucketMismatch {
                    metric: meta.name.clone(),
                })
            }
            Err(err) => Err(err),
        }
    }

    fn collect(&self) -> Result<Vec<MetricFamilySamples>, StorageError> {
        let mut families = Vec::new();
        let mut connection = self.connection.lock();
        if connection.is_none() {
            *connection = Some(self.connect()?);
        }
        let Some(con) = connection.as_mut() else {
            return Err(StorageError::ConnectionFailed(
                "no Redis connection available".to_string(),
            ));
        };

        for metric_type in MetricType::ALL {
            if let Err(err) = self.collect_type(con, metric_type, &mut families) {
                if matches!(err, StorageError::ConnectionFailed(_)) {
                    *connection = None;
                }
                return Err(err);
            }
        }
        drop(connection);

        sort_families(&mut families);
        StorageTelemetry::global().record_operation(BACKEND, "collect");
        Ok(families)
    }

    fn flush(&self) -> Result<(), StorageError> {
        let index_keys: Vec<String> = MetricType::ALL
            .iter()
            .map(|metric_type| index_key(&self.key_prefix, *metric_type))
            .collect();

        let deleted = self.with_connection(|con| {
            ::redis::transaction(con, &index_keys, |con, pipe| {
                let mut hashes: Vec<String> = Vec::new();
                for index in &index_keys {
                    let members: Vec<String> = con.smembers(index)?;
                    hashes.extend(members);
                }
                for hash in &hashes {
                    pipe.del(hash).ignore();
                }
                for index in &index_keys {
                    pipe.del(index).ignore();
                }
                pipe.query::<Option<()>>(con)
                    .map(|reply| reply.map(|_| hashes.len()))
            })
        })?;

        tracing::info!(backend = BACKEND, deleted, "Flushed metric storage");
        Ok(())
    }
}

// Verify Send + Sync bounds (required for Arc<dyn Store>)
fn _assert_send_sync() {
    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    assert_send::<RedisStore>();
    assert_sync::<RedisStore>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_url_is_configuration_error() {
        let result = RedisStore::new(RedisConfig::default());
        assert!(matches!(result, Err(StorageError::Configuration(_))));
    }

    #[test]
    fn test_empty_prefix_is_configuration_error() {
        let config = RedisConfig {
            redis_url: Some("redis://127.0.0.1:6379".to_string()),
            redis_key_prefix: String::new(),
            ..Default::default()
        };
        assert!(matches!(
            RedisStore::new(config),
            Err(StorageError::Configuration(_))
        ));
    }

    #[test]
    fn test_unreachable_server_is_connection_error() {
        let config = RedisConfig {
            redis_url: Some("redis://127.0.0.1:19999".to_string()),
            connection_timeout_ms: 200,
            ..Default::default()
        };
        assert!(matches!(
            RedisStore::new(config),
            Err(StorageError::ConnectionFailed(_))
        ));
    }

    #[test]
    fn test_invalid_url_is_connection_error() {
        let config = RedisConfig {
            redis_url: Some("not a url".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            RedisStore::new(config),
            Err(StorageError::ConnectionFailed(_))
        ));
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("k", "368").unwrap(), 368.0);
        assert_eq!(parse_number("k", "0.14").unwrap(), 0.14);
        assert!(matches!(
            parse_number("k", "abc"),
            Err(StorageError::Backend(_))
        ));
    }

    #[test]
    fn test_redis_store_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedisStore>();
        assert_sync::<RedisStore>();
    }
}
