//! Volatile in-process store
//!
//! Keeps every series in process memory behind a single mutex. Values live as
//! long as the store and are lost when the process exits.

use parking_lot::Mutex;
use std::collections::HashMap;

use super::aggregate::{bucket_index, sort_families, HistogramAccumulator, SeriesAccumulator};
use super::error::StorageError;
use super::telemetry::StorageTelemetry;
use super::traits::{MetricMeta, Store};
use crate::sample::{MetricFamilySamples, MetricType};

const BACKEND: &str = "memory";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum HistogramField {
    Sum,
    Bucket(usize),
}

#[derive(Debug)]
struct MetricEntry<K> {
    meta: MetricMeta,
    samples: HashMap<K, f64>,
}

impl<K> MetricEntry<K> {
    fn new(meta: &MetricMeta) -> Self {
        Self {
            meta: meta.clone(),
            samples: HashMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    counters: HashMap<String, MetricEntry<Vec<String>>>,
    gauges: HashMap<String, MetricEntry<Vec<String>>>,
    histograms: HashMap<String, MetricEntry<(Vec<String>, HistogramField)>>,
}

/// Process-local store with structured keys
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update_series<F>(
        table: &mut HashMap<String, MetricEntry<Vec<String>>>,
        meta: &MetricMeta,
        label_values: &[String],
        update: F,
    ) where
        F: FnOnce(&mut f64),
    {
        let entry = table
            .entry(meta.name.clone())
            .or_insert_with(|| MetricEntry::new(meta));
        let value = entry.samples.entry(label_values.to_vec()).or_insert(0.0);
        update(value);
    }
}

fn collect_series(
    table: &HashMap<String, MetricEntry<Vec<String>>>,
    metric_type: MetricType,
    families: &mut Vec<MetricFamilySamples>,
) {
    for entry in table.values() {
        let mut acc = SeriesAccumulator::new();
        for (label_values, value) in &entry.samples {
            acc.record(label_values.clone(), *value);
        }
        families.push(acc.into_family(&entry.meta, metric_type));
    }
}

impl Store for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    fn increment_counter(
        &self,
        meta: &MetricMeta,
        label_values: &[String],
        value: f64,
    ) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        Self::update_series(&mut state.counters, meta, label_values, |v| *v += value);
        StorageTelemetry::global().record_operation(BACKEND, "increment_counter");
        Ok(())
    }

    fn set_gauge(
        &self,
        meta: &MetricMeta,
        label_values: &[String],
        value: f64,
    ) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        Self::update_series(&mut state.gauges, meta, label_values, |v| *v = value);
        StorageTelemetry::global().record_operation(BACKEND, "set_gauge");
        Ok(())
    }

    fn add_to_gauge(
        &self,
        meta: &MetricMeta,
        label_values: &[String],
        value: f64,
    ) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        Self::update_series(&mut state.gauges, meta, label_values, |v| *v += value);
        StorageTelemetry::global().record_operation(BACKEND, "add_to_gauge");
        Ok(())
    }

    fn update_histogram(
        &self,
        meta: &MetricMeta,
        label_values: &[String],
        value: f64,
    ) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        let entry = state
            .histograms
            .entry(meta.name.clone())
            .or_insert_with(|| MetricEntry::new(meta));
        if entry.meta.buckets != meta.buckets {
            return Err(StorageError::BucketMismatch {
                metric: meta.name.clone(),
            });
        }

        let index = bucket_index(meta.bucket_bounds(), value);
        *entry
            .samples
            .entry((label_values.to_vec(), HistogramField::Sum))
            .or_insert(0.0) += value;
        *entry
            .samples
            .entry((label_values.to_vec(), HistogramField::Bucket(index)))
            .or_insert(0.0) += 1.0;
        StorageTelemetry::global().record_operation(BACKEND, "update_histogram");
        Ok(())
    }

    fn collect(&self) -> Result<Vec<MetricFamilySamples>, StorageError> {
        let state = self.state.lock();
        let mut families = Vec::new();

        collect_series(&state.counters, MetricType::Counter, &mut families);
        collect_series(&state.gauges, MetricType::Gauge, &mut families);

        for entry in state.histograms.values() {
            let mut acc = HistogramAccumulator::new();
            for ((label_values, field), value) in &entry.samples {
                match field {
                    HistogramField::Sum => acc.record_sum(label_values.clone(), *value),
                    HistogramField::Bucket(index) => {
                        acc.record_bucket(label_values.clone(), *index, *value)
                    }
                }
            }
            families.push(acc.into_family(&entry.meta));
        }

        sort_families(&mut families);
        StorageTelemetry::global().record_operation(BACKEND, "collect");
        Ok(families)
    }

    fn flush(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock();
        *state = MemoryState::default();
        tracing::info!(backend = BACKEND, "Flushed metric storage");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn labels(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_counter_accumulates() {
        let store = InMemoryStore::new();
        let meta = MetricMeta::new("jobs_total", "Jobs", labels(&["queue"]));
        store.increment_counter(&meta, &labels(&["a"]), 1.0).unwrap();
        store.increment_counter(&meta, &labels(&["a"]), 2.5).unwrap();
        store.increment_counter(&meta, &labels(&["b"]), 1.0).unwrap();

        let families = store.collect().unwrap();
        assert_eq!(families.len(), 1);
        let values: Vec<(Vec<String>, f64)> = families[0]
            .samples
            .iter()
            .map(|s| (s.label_values.clone(), s.value))
            .collect();
        assert_eq!(values, vec![(labels(&["a"]), 3.5), (labels(&["b"]), 1.0)]);
    }

    #[test]
    fn test_gauge_set_then_add() {
        let store = InMemoryStore::new();
        let meta = MetricMeta::new("temperature", "Temp", vec![]);
        store.set_gauge(&meta, &[], 10.0).unwrap();
        store.set_gauge(&meta, &[], 20.0).unwrap();
        store.add_to_gauge(&meta, &[], -5.0).unwrap();

        let families = store.collect().unwrap();
        assert_eq!(families[0].metric_type, MetricType::Gauge);
        assert_eq!(families[0].samples[0].value, 15.0);
    }

    #[test]
    fn test_histogram_rejects_different_buckets() {
        let store = InMemoryStore::new();
        let meta = MetricMeta::new("latency", "Latency", vec![]).with_buckets(vec![1.0, 2.0]);
        store.update_histogram(&meta, &[], 1.5).unwrap();

        let other = meta.clone().with_buckets(vec![1.0, 3.0]);
        assert!(matches!(
            store.update_histogram(&other, &[], 1.5),
            Err(StorageError::BucketMismatch { .. })
        ));
    }

    #[test]
    fn test_flush_clears_everything() {
        let store = InMemoryStore::new();
        let meta = MetricMeta::new("jobs_total", "Jobs", vec![]);
        store.increment_counter(&meta, &[], 1.0).unwrap();
        store.flush().unwrap();
        assert!(store.collect().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_increments_are_not_lost() {
        let store = Arc::new(InMemoryStore::new());
        let meta = Arc::new(MetricMeta::new("hits_total", "Hits", vec![]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let meta = meta.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        store.increment_counter(&meta, &[], 1.0).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.collect().unwrap()[0].samples[0].value, 8000.0);
    }
}
