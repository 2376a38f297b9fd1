//! Histograms with fixed bucket boundaries

use std::sync::Arc;

use super::owned_label_values;
use crate::error::{MetricsError, Result};
use crate::names::{HistogramLabelNames, MetricName};
use crate::storage::{MetricMeta, Store};

/// Default bucket upper bounds, tuned for request latencies in seconds
pub const DEFAULT_BUCKETS: [f64; 14] = [
    0.005, 0.01, 0.025, 0.05, 0.075, 0.1, 0.25, 0.5, 0.75, 1.0, 2.5, 5.0, 7.5, 10.0,
];

pub struct Histogram {
    storage: Arc<dyn Store>,
    meta: MetricMeta,
}

impl Histogram {
    /// Creates a histogram; `None` buckets means [`DEFAULT_BUCKETS`]
    ///
    /// # Errors
    ///
    /// Returns `InvalidBuckets` when the list is empty, not strictly
    /// increasing, or contains a non-finite bound (`+Inf` is implicit).
    pub fn new(
        storage: Arc<dyn Store>,
        name: MetricName,
        help: impl Into<String>,
        label_names: HistogramLabelNames,
        buckets: Option<Vec<f64>>,
    ) -> Result<Self> {
        let buckets = buckets.unwrap_or_else(Self::default_buckets);
        validate_buckets(&buckets)?;
        let meta = MetricMeta::new(name.as_str(), help, label_names.as_slice().to_vec())
            .with_buckets(buckets);
        Ok(Self { storage, meta })
    }

    pub fn default_buckets() -> Vec<f64> {
        DEFAULT_BUCKETS.to_vec()
    }

    /// `count` buckets starting at `start`, each `factor` times the previous
    pub fn exponential_buckets(start: f64, factor: f64, count: usize) -> Result<Vec<f64>> {
        if !(start > 0.0) || !start.is_finite() {
            return Err(MetricsError::InvalidBuckets(format!(
                "exponential buckets need a positive start, got {}",
                start
            )));
        }
        if !(factor > 1.0) || !factor.is_finite() {
            return Err(MetricsError::InvalidBuckets(format!(
                "exponential buckets need a factor above 1, got {}",
                factor
            )));
        }
        if count == 0 {
            return Err(MetricsError::InvalidBuckets(
                "bucket count must be at least 1".to_string(),
            ));
        }
        let mut buckets = Vec::with_capacity(count);
        let mut bound = start;
        for _ in 0..count {
            buckets.push(bound);
            bound *= factor;
        }
        Ok(buckets)
    }

    /// `count` buckets starting at `start`, spaced `width` apart
    pub fn linear_buckets(start: f64, width: f64, count: usize) -> Result<Vec<f64>> {
        if !(width > 0.0) || !width.is_finite() || !start.is_finite() {
            return Err(MetricsError::InvalidBuckets(format!(
                "linear buckets need a finite start and positive width, got {} / {}",
                start, width
            )));
        }
        if count == 0 {
            return Err(MetricsError::InvalidBuckets(
                "bucket count must be at least 1".to_string(),
            ));
        }
        Ok((0..count).map(|i| start + width * i as f64).collect())
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

    pub fn buckets(&self) -> &[f64] {
        self.meta.bucket_bounds()
    }

    pub fn observe(&self, value: f64, label_values: &[&str]) -> Result<()> {
        let label_values = owned_label_values(&self.meta, label_values)?;
        self.storage
            .update_histogram(&self.meta, &label_values, value)?;
        Ok(())
    }
}

fn validate_buckets(buckets: &[f64]) -> Result<()> {
    if buckets.is_empty() {
        return Err(MetricsError::InvalidBuckets(
            "histogram needs at least one bucket".to_string(),
        ));
    }
    if let Some(bad) = buckets.iter().find(|b| !b.is_finite()) {
        return Err(MetricsError::InvalidBuckets(format!(
            "bucket bound {} is not finite",
            bad
        )));
    }
    if let Some(pair) = buckets.windows(2).find(|pair| pair[0] >= pair[1]) {
        return Err(MetricsError::InvalidBuckets(format!(
            "buckets must be strictly increasing, found {} before {}",
            pair[0], pair[1]
        )));
    }
    Ok(())
}

impl std::fmt::Debug for Histogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Histogram")
            .field("meta", &self.meta)
            .field("backend", &self.storage.backend_name())
            .finish()
    }
}
