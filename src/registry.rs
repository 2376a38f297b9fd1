// Collector registry
//
// Keeps one live metric object per name and kind, and delegates collection
// to the storage backend.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{MetricsError, Result};
use crate::metrics::{Counter, Gauge, Histogram};
use crate::names::{HistogramLabelNames, MetricLabelNames, MetricName};
use crate::render::render_text;
use crate::sample::MetricFamilySamples;
use crate::storage::Store;

const COUNTER: &str = "counter";
const GAUGE: &str = "gauge";
const HISTOGRAM: &str = "histogram";

/// Registry of counters, gauges and histograms sharing one store
///
/// Each kind has its own namespace: a counter and a gauge may share a name,
/// two counters may not.
pub struct CollectorRegistry {
    storage: Arc<dyn Store>,
    counters: Mutex<HashMap<String, Arc<Counter>>>,
    gauges: Mutex<HashMap<String, Arc<Gauge>>>,
    histograms: Mutex<HashMap<String, Arc<Histogram>>>,
}

fn register_in<T, F>(
    table: &Mutex<HashMap<String, Arc<T>>>,
    kind: &'static str,
    name: MetricName,
    build: F,
) -> Result<Arc<T>>
where
    F: FnOnce(MetricName) -> Result<T>,
{
    let mut table = table.lock();
    if table.contains_key(name.as_str()) {
        tracing::debug!(kind, name = %name, "Rejected duplicate registration");
        return Err(MetricsError::AlreadyRegistered {
            kind,
            name: name.as_str().to_string(),
        });
    }
    let key = name.as_str().to_string();
    let metric = Arc::new(build(name)?);
    table.insert(key, metric.clone());
    Ok(metric)
}

fn get_or_register_in<T, F>(
    table: &Mutex<HashMap<String, Arc<T>>>,
    name: MetricName,
    build: F,
) -> Result<Arc<T>>
where
    F: FnOnce(MetricName) -> Result<T>,
{
    let mut table = table.lock();
    if let Some(existing) = table.get(name.as_str()) {
        return Ok(existing.clone());
    }
    let key = name.as_str().to_string();
    let metric = Arc::new(build(name)?);
    table.insert(key, metric.clone());
    Ok(metric)
}

fn get_in<T>(
    table: &Mutex<HashMap<String, Arc<T>>>,
    kind: &'static str,
    name: MetricName,
) -> Result<Arc<T>> {
    table
        .lock()
        .get(name.as_str())
        .cloned()
        .ok_or_else(|| MetricsError::NotFound {
            kind,
            name: name.as_str().to_string(),
        })
}

impl CollectorRegistry {
    pub fn new(storage: Arc<dyn Store>) -> Self {
        Self {
            storage,
            counters: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Store> {
        &self.storage
    }

    /// Every family currently held by the store
    pub fn metric_family_samples(&self) -> Result<Vec<MetricFamilySamples>> {
        Ok(self.storage.collect()?)
    }

    /// Collects and renders in the text exposition format
    pub fn render(&self) -> Result<String> {
        render_text(&self.metric_family_samples()?)
    }

    /// Clears the backing store; registered objects stay usable
    pub fn wipe_storage(&self) -> Result<()> {
        Ok(self.storage.flush()?)
    }

    fn counter_builder<'a>(
        &'a self,
        help: &'a str,
        labels: &'a [&'a str],
    ) -> impl FnOnce(MetricName) -> Result<Counter> + 'a {
        move |name| {
            let labels = MetricLabelNames::new(labels.iter().copied())?;
            Ok(Counter::new(self.storage.clone(), name, help, labels))
        }
    }

    fn gauge_builder<'a>(
        &'a self,
        help: &'a str,
        labels: &'a [&'a str],
    ) -> impl FnOnce(MetricName) -> Result<Gauge> + 'a {
        move |name| {
            let labels = MetricLabelNames::new(labels.iter().copied())?;
            Ok(Gauge::new(self.storage.clone(), name, help, labels))
        }
    }

    fn histogram_builder<'a>(
        &'a self,
        help: &'a str,
        labels: &'a [&'a str],
        buckets: Option<Vec<f64>>,
    ) -> impl FnOnce(MetricName) -> Result<Histogram> + 'a {
        move |name| {
            let labels = HistogramLabelNames::new(labels.iter().copied())?;
            Histogram::new(self.storage.clone(), name, help, labels, buckets)
        }
    }

    pub fn register_counter(
        &self,
        namespace: &str,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<Arc<Counter>> {
        let name = MetricName::with_namespace(namespace, name)?;
        register_in(&self.counters, COUNTER, name, self.counter_builder(help, labels))
    }

    pub fn get_counter(&self, namespace: &str, name: &str) -> Result<Arc<Counter>> {
        get_in(&self.counters, COUNTER, MetricName::with_namespace(namespace, name)?)
    }

    /// Returns the registered counter, ignoring `help` and `labels` on a hit
    pub fn get_or_register_counter(
        &self,
        namespace: &str,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<Arc<Counter>> {
        let name = MetricName::with_namespace(namespace, name)?;
        get_or_register_in(&self.counters, name, self.counter_builder(help, labels))
    }

    pub fn register_gauge(
        &self,
        namespace: &str,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<Arc<Gauge>> {
        let name = MetricName::with_namespace(namespace, name)?;
        register_in(&self.gauges, GAUGE, name, self.gauge_builder(help, labels))
    }

    pub fn get_gauge(&self, namespace: &str, name: &str) -> Result<Arc<Gauge>> {
        get_in(&self.gauges, GAUGE, MetricName::with_namespace(namespace, name)?)
    }

    pub fn get_or_register_gauge(
        &self,
        namespace: &str,
        name: &str,
        help: &str,
        labels: &[&str],
    ) -> Result<Arc<Gauge>> {
        let name = MetricName::with_namespace(namespace, name)?;
        get_or_register_in(&self.gauges, name, self.gauge_builder(help, labels))
    }

    pub fn register_histogram(
        &self,
        namespace: &str,
        name: &str,
        help: &str,
        labels: &[&str],
        buckets: Option<Vec<f64>>,
    ) -> Result<Arc<Histogram>> {
        let name = MetricName::with_namespace(namespace, name)?;
        register_in(
            &self.histograms,
            HISTOGRAM,
            name,
            self.histogram_builder(help, labels, buckets),
        )
    }

    pub fn get_histogram(&self, namespace: &str, name: &str) -> Result<Arc<Histogram>> {
        get_in(
            &self.histograms,
            HISTOGRAM,
            MetricName::with_namespace(namespace, name)?,
        )
    }

    /// Returns the registered histogram, ignoring `help`, `labels` and
    /// `buckets` on a hit
    pub fn get_or_register_histogram(
        &self,
        namespace: &str,
        name: &str,
        help: &str,
        labels: &[&str],
        buckets: Option<Vec<f64>>,
    ) -> Result<Arc<Histogram>> {
        let name = MetricName::with_namespace(namespace, name)?;
        get_or_register_in(
            &self.histograms,
            name,
            self.histogram_builder(help, labels, buckets),
        )
    }
}
