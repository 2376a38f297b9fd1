//! Monotonic counters

use std::sync::Arc;

use super::owned_label_values;
use crate::error::{MetricsError, Result};
use crate::names::{MetricLabelNames, MetricName};
use crate::storage::{MetricMeta, Store};

/// A counter that only goes up
pub struct Counter {
    storage: Arc<dyn Store>,
    meta: MetricMeta,
}

impl Counter {
    pub fn new(
        storage: Arc<dyn Store>,
        name: MetricName,
        help: impl Into<String>,
        label_names: MetricLabelNames,
    ) -> Self {
        let meta = MetricMeta::new(name.as_str(), help, label_names.as_slice().to_vec());
        Self { storage, meta }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn help(&self) -> &str {
        &self.meta.help
    }

    pub fn label_names(&self) -> &[String] {
        &self.meta.label_names
    }

    pub fn inc(&self, label_values: &[&str]) -> Result<()> {
        self.inc_by(1.0, label_values)
    }

    /// Adds `count`, which must be strictly positive
    pub fn inc_by(&self, count: f64, label_values: &[&str]) -> Result<()> {
        // NaN fails this comparison too.
        if !(count > 0.0) {
            return Err(MetricsError::NonPositiveIncrement {
                metric: self.meta.name.clone(),
                value: count,
            });
        }
        let label_values = owned_label_values(&self.meta, label_values)?;
        self.storage
            .increment_counter(&self.meta, &label_values, count)?;
        Ok(())
    }
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Counter")
            .field("meta", &self.meta)
            .field("backend", &self.storage.backend_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStore;

    fn counter(labels: &[&str]) -> (Arc<InMemoryStore>, Counter) {
        let store = Arc::new(InMemoryStore::new());
        let counter = Counter::new(
            store.clone(),
            MetricName::new("jobs_total").unwrap(),
            "Processed jobs",
            MetricLabelNames::new(labels.iter().copied()).unwrap(),
        );
        (store, counter)
    }

    #[test]
    fn test_inc_and_inc_by() {
        let (store, counter) = counter(&["queue"]);
        counter.inc(&["mail"]).unwrap();
        counter.inc_by(4.0, &["mail"]).unwrap();

        let families = store.collect().unwrap();
        assert_eq!(families[0].name, "jobs_total");
        assert_eq!(families[0].help, "Processed jobs");
        assert_eq!(families[0].samples[0].value, 5.0);
    }

    #[test]
    fn test_rejects_non_positive_increments_before_storage() {
        let (store, counter) = counter(&[]);
        for bad in [0.0, -1.0, f64::NAN] {
            assert!(matches!(
                counter.inc_by(bad, &[]),
                Err(MetricsError::NonPositiveIncrement { .. })
            ));
        }
        assert!(store.collect().unwrap().is_empty());
    }

    #[test]
    fn test_rejects_wrong_label_count() {
        let (_, counter) = counter(&["queue", "host"]);
        assert!(matches!(
            counter.inc(&["mail"]),
            Err(MetricsError::LabelArity {
                expected: 2,
                actual: 1,
                ..
            })
        ));
    }
}
