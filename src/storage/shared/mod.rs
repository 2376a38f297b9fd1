//! Cross-process store backed by a shared memory-mapped segment
//!
//! Every process that opens the same segment file sees the same series.
//! Only three primitives are used on shared data: add-if-absent on slot
//! keys, integer `fetch_add` for bucket counts, and compare-and-swap on the
//! bit pattern of `f64` values.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::Ordering;

use super::aggregate::{
    bucket_index, bucket_index_for_label, bucket_label, decode_label_key, sort_families,
    HistogramAccumulator, SeriesAccumulator,
};
use super::error::StorageError;
use super::telemetry::StorageTelemetry;
use super::traits::{MetricMeta, Store};
use crate::sample::{MetricFamilySamples, MetricType};

pub mod config;
pub mod key;
pub mod segment;

pub use config::SharedConfig;
pub use segment::{fetch_add_f64, Segment};

use key::{meta_key, namespace, parse_key, value_key, ParsedKey, SUM_FIELD, VALUE_FIELD};

const BACKEND: &str = "shared";

/// Store whose series live in a segment shared by cooperating processes
pub struct SharedStore {
    segment: Segment,
    prefix: String,
    /// Stored metadata bytes and their parsed bucket set, by metric name
    confirmed_buckets: Mutex<HashMap<String, (Vec<u8>, Vec<f64>)>>,
}

impl SharedStore {
    /// Opens (or creates) the segment described by `config`
    pub fn open(config: &SharedConfig) -> Result<Self, StorageError> {
        if config.key_prefix.is_empty() || config.key_prefix.contains(':') {
            return Err(StorageError::Configuration(format!(
                "key_prefix must be non-empty and must not contain ':', got '{}'",
                config.key_prefix
            )));
        }
        let segment = Segment::open(&config.path, config.capacity)?;
        Ok(Self {
            segment,
            prefix: config.key_prefix.clone(),
            confirmed_buckets: Mutex::new(HashMap::new()),
        })
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    /// Writes the metadata record unless one already exists and returns its
    /// slot. Runs before any value slot is created for the metric.
    fn ensure_meta(
        &self,
        metric_type: MetricType,
        meta: &MetricMeta,
    ) -> Result<usize, StorageError> {
        let key = meta_key(&self.prefix, metric_type, &meta.name);
        if let Some(slot) = self.segment.find(&key)? {
            return Ok(slot);
        }
        let blob = serde_json::to_vec(meta)?;
        let claim = self.segment.get_or_insert(&key, &blob, 0)?;
        if claim.inserted {
            tracing::debug!(metric = %meta.name, %metric_type, "Registered metric metadata");
        }
        Ok(claim.slot)
    }

    fn value_slot(
        &self,
        metric_type: MetricType,
        meta: &MetricMeta,
        label_values: &[String],
        field: &str,
    ) -> Result<usize, StorageError> {
        let key = value_key(&self.prefix, metric_type, &meta.name, label_values, field)?;
        Ok(self.segment.get_or_insert(&key, &[], 0)?.slot)
    }

    /// First bucket set written for a histogram wins; later writers must match.
    /// The stored record is re-read on every write since another process may
    /// have flushed and re-registered the metric.
    fn check_buckets(&self, meta: &MetricMeta) -> Result<(), StorageError> {
        let slot = self.ensure_meta(MetricType::Histogram, meta)?;
        let stored_blob = self.segment.blob(slot);

        let mut confirmed = self.confirmed_buckets.lock();
        let cached = confirmed
            .get(&meta.name)
            .is_some_and(|(blob, _)| blob.as_slice() == stored_blob);
        if !cached {
            let stored: MetricMeta = serde_json::from_slice(stored_blob)?;
            confirmed.insert(
                meta.name.clone(),
                (stored_blob.to_vec(), stored.bucket_bounds().to_vec()),
            );
        }
        let matches = confirmed
            .get(&meta.name)
            .is_some_and(|(_, buckets)| buckets.as_slice() == meta.bucket_bounds());
        if matches {
            Ok(())
        } else {
            Err(StorageError::BucketMismatch {
                metric: meta.name.clone(),
            })
        }
    }

    fn add_float(&self, slot: usize, delta: f64) {
        let retries = fetch_add_f64(self.segment.value(slot), delta);
        if retries > 0 {
            tracing::debug!(retries, "Float update needed CAS retries");
        }
        StorageTelemetry::global().record_cas_retries(BACKEND, retries);
    }
}

#[derive(Default)]
struct RawValues {
    metas: HashMap<(MetricType, String), MetricMeta>,
    values: Vec<(MetricType, String, String, String, u64)>,
}

impl Store for SharedStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn increment_counter(
        &self,
        meta: &MetricMeta,
        label_values: &[String],
        value: f64,
    ) -> Result<(), StorageError> {
        self.ensure_meta(MetricType::Counter, meta)?;
        let slot = self.value_slot(MetricType::Counter, meta, label_values, VALUE_FIELD)?;
        self.add_float(slot, value);
        StorageTelemetry::global().record_operation(BACKEND, "increment_counter");
        Ok(())
    }

    fn set_gauge(
        &self,
        meta: &MetricMeta,
        label_values: &[String],
        value: f64,
    ) -> Result<(), StorageError> {
        self.ensure_meta(MetricType::Gauge, meta)?;
        let slot = self.value_slot(MetricType::Gauge, meta, label_values, VALUE_FIELD)?;
        self.segment
            .value(slot)
            .store(value.to_bits(), Ordering::Release);
        StorageTelemetry::global().record_operation(BACKEND, "set_gauge");
        Ok(())
    }

    fn add_to_gauge(
        &self,
        meta: &MetricMeta,
        label_values: &[String],
        value: f64,
    ) -> Result<(), StorageError> {
        self.ensure_meta(MetricType::Gauge, meta)?;
        let slot = self.value_slot(MetricType::Gauge, meta, label_values, VALUE_FIELD)?;
        self.add_float(slot, value);
        StorageTelemetry::global().record_operation(BACKEND, "add_to_gauge");
        Ok(())
    }

    fn update_histogram(
        &self,
        meta: &MetricMeta,
        label_values: &[String],
        value: f64,
    ) -> Result<(), StorageError> {
        self.check_buckets(meta)?;

        let bounds = meta.bucket_bounds();
        let sum_slot = self.value_slot(MetricType::Histogram, meta, label_values, SUM_FIELD)?;
        self.add_float(sum_slot, value);

        let bucket = bucket_label(bounds, bucket_index(bounds, value));
        let bucket_slot = self.value_slot(MetricType::Histogram, meta, label_values, &bucket)?;
        self.segment
            .value(bucket_slot)
            .fetch_add(1, Ordering::AcqRel);

        StorageTelemetry::global().record_operation(BACKEND, "update_histogram");
        Ok(())
    }

    fn collect(&self) -> Result<Vec<MetricFamilySamples>, StorageError> {
        let mut raw = RawValues::default();
        for entry in self.segment.snapshot(&namespace(&self.prefix)) {
            match parse_key(&self.prefix, &entry.key) {
                Some(ParsedKey::Meta { metric_type, name }) => {
                    let meta: MetricMeta = serde_json::from_slice(&entry.blob)?;
                    raw.metas.insert((metric_type, name), meta);
                }
                Some(ParsedKey::Value {
                    metric_type,
                    name,
                    labels,
                    field,
                }) => raw.values.push((metric_type, name, labels, field, entry.value)),
                None => tracing::warn!(key = %entry.key, "Skipping unrecognized segment key"),
            }
        }

        let mut series: HashMap<(MetricType, String), SeriesAccumulator> = HashMap::new();
        let mut histograms: HashMap<String, HistogramAccumulator> = HashMap::new();

        for (metric_type, name, labels, field, bits) in raw.values {
            let Some(meta) = raw.metas.get(&(metric_type, name.clone())) else {
                // Value published before its metadata; picked up next scrape.
                tracing::debug!(metric = %name, "Value without metadata yet");
                continue;
            };
            let label_values = decode_label_key(&labels)?;
            match metric_type {
                MetricType::Counter | MetricType::Gauge => {
                    series
                        .entry((metric_type, name))
                        .or_default()
                        .record(label_values, f64::from_bits(bits));
                }
                MetricType::Histogram => {
                    let acc = histograms.entry(name).or_default();
                    if field == SUM_FIELD {
                        acc.record_sum(label_values, f64::from_bits(bits));
                    } else if let Some(index) = bucket_index_for_label(meta.bucket_bounds(), &field)
                    {
                        acc.record_bucket(label_values, index, bits as f64);
                    } else {
                        tracing::warn!(metric = %meta.name, bucket = %field, "Skipping unknown bucket");
                    }
                }
            }
        }

        let mut families = Vec::new();
        for ((metric_type, name), meta) in &raw.metas {
            match metric_type {
                MetricType::Counter | MetricType::Gauge => {
                    if let Some(acc) = series.remove(&(*metric_type, name.clone())) {
                        families.push(acc.into_family(meta, *metric_type));
                    }
                }
                MetricType::Histogram => {
                    if let Some(acc) = histograms.remove(name) {
                        families.push(acc.into_family(meta));
                    }
                }
            }
        }

        sort_families(&mut families);
        StorageTelemetry::global().record_operation(BACKEND, "collect");
        Ok(families)
    }

    fn flush(&self) -> Result<(), StorageError> {
        let removed = self.segment.tombstone_prefix(&namespace(&self.prefix));
        self.confirmed_buckets.lock().clear();
        tracing::info!(
            backend = BACKEND,
            removed,
            path = %self.segment.path().display(),
            "Flushed metric storage"
        );
        Ok(())
    }
}
