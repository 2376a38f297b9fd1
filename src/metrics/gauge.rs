//! Gauges: values that go up and down

use std::sync::Arc;

use super::owned_label_values;
use crate::error::Result;
use crate::names::{MetricLabelNames, MetricName};
use crate::storage::{MetricMeta, Store};

pub struct Gauge {
    storage: Arc<dyn Store>,
    meta: MetricMeta,
}

impl Gauge {
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

    /// Overwrites the value; concurrent setters race and the last one wins
    pub fn set(&self, value: f64, label_values: &[&str]) -> Result<()> {
        let label_values = owned_label_values(&self.meta, label_values)?;
        self.storage.set_gauge(&self.meta, &label_values, value)?;
        Ok(())
    }

    pub fn inc(&self, label_values: &[&str]) -> Result<()> {
        self.inc_by(1.0, label_values)
    }

    pub fn inc_by(&self, value: f64, label_values: &[&str]) -> Result<()> {
        let label_values = owned_label_values(&self.meta, label_values)?;
        self.storage.add_to_gauge(&self.meta, &label_values, value)?;
        Ok(())
    }

    pub fn dec(&self, label_values: &[&str]) -> Result<()> {
        self.inc_by(-1.0, label_values)
    }

    pub fn dec_by(&self, value: f64, label_values: &[&str]) -> Result<()> {
        self.inc_by(-value, label_values)
    }
}

impl std::fmt::Debug for Gauge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gauge")
            .field("meta", &self.meta)
            .field("backend", &self.storage.backend_name())
            .finish()
    }
}
