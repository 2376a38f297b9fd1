// Metric front-end objects
//
// Thin validating wrappers: they check label arity and value constraints,
// then hand the write to the storage backend.

use crate::error::{MetricsError, Result};
use crate::storage::MetricMeta;

pub mod counter;
pub mod gauge;
pub mod histogram;

pub use counter::Counter;
pub use gauge::Gauge;
pub use histogram::Histogram;

/// Checks label arity and converts label values for the store
pub(crate) fn owned_label_values(meta: &MetricMeta, label_values: &[&str]) -> Result<Vec<String>> {
    if label_values.len() != meta.label_names.len() {
        return Err(MetricsError::LabelArity {
            metric: meta.name.clone(),
            expected: meta.label_names.len(),
            actual: label_values.len(),
        });
    }
    Ok(label_values.iter().map(|v| v.to_string()).collect())
}
