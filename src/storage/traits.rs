//! Store trait definition
//!
//! This module defines the `Store` trait that all storage backends must satisfy.
//! The trait provides a common interface for the volatile, shared-segment and
//! Redis backends.

use serde::{Deserialize, Serialize};

use super::error::StorageError;
use crate::sample::MetricFamilySamples;

/// Immutable metadata of one metric, written once alongside its first value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricMeta {
    pub name: String,
    pub help: String,
    #[serde(rename = "labelNames")]
    pub label_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buckets: Option<Vec<f64>>,
}

impl MetricMeta {
    pub fn new(name: impl Into<String>, help: impl Into<String>, label_names: Vec<String>) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            label_names,
            buckets: None,
        }
    }

    pub fn with_buckets(mut self, buckets: Vec<f64>) -> Self {
        self.buckets = Some(buckets);
        self
    }

    /// Configured bucket upper bounds, empty for non-histograms
    pub fn bucket_bounds(&self) -> &[f64] {
        self.buckets.as_deref().unwrap_or(&[])
    }
}

/// Storage trait for the interchangeable metric backends
///
/// Callers validate label arity and counter positivity before reaching the
/// store; backends trust `label_values.len() == meta.label_names.len()`.
pub trait Store: Send + Sync {
    /// Short backend identifier used in logs and self-metrics
    fn backend_name(&self) -> &'static str;

    /// Add `value` to the counter series for `label_values`
    fn increment_counter(
        &self,
        meta: &MetricMeta,
        label_values: &[String],
        value: f64,
    ) -> Result<(), StorageError>;

    /// Overwrite the gauge series (last write wins)
    fn set_gauge(
        &self,
        meta: &MetricMeta,
        label_values: &[String],
        value: f64,
    ) -> Result<(), StorageError>;

    /// Add `value` (possibly negative) to the gauge series
    fn add_to_gauge(
        &self,
        meta: &MetricMeta,
        label_values: &[String],
        value: f64,
    ) -> Result<(), StorageError>;

    /// Record one observation; `meta.buckets` holds the bucket bounds
    fn update_histogram(
        &self,
        meta: &MetricMeta,
        label_values: &[String],
        value: f64,
    ) -> Result<(), StorageError>;

    /// Aggregate every stored series into metric families
    fn collect(&self) -> Result<Vec<MetricFamilySamples>, StorageError>;

    /// Remove everything this library stored, leaving foreign data intact
    fn flush(&self) -> Result<(), StorageError>;
}
