// Storage layer self-instrumentation
//
// Provides process-global Prometheus metrics about the storage backends:
// - Operation counters per backend
// - CAS retry counters for lock-free float updates
// - Lua script latency histograms for the Redis backend

use prometheus::{
    register_histogram_vec, register_int_counter_vec, Encoder, Histogram, HistogramVec,
    IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;

use super::error::StorageError;

/// Global metrics about storage backend behaviour
pub struct StorageTelemetry {
    /// Total number of storage operations by backend and operation
    pub operations: IntCounterVec,

    /// Total number of failed compare-and-swap attempts by backend
    pub cas_retries: IntCounterVec,

    /// Script execution duration histogram (in seconds)
    pub script_duration: HistogramVec,
}

static TELEMETRY: OnceLock<StorageTelemetry> = OnceLock::new();

impl StorageTelemetry {
    /// Initialize and return the global telemetry instance
    pub fn global() -> &'static Self {
        TELEMETRY.get_or_init(|| {
            let operations = register_int_counter_vec!(
                "masu_storage_operations_total",
                "Total number of storage operations by backend and operation",
                &["backend", "operation"]
            )
            .expect("Failed to register masu_storage_operations_total metric");

            let cas_retries = register_int_counter_vec!(
                "masu_storage_cas_retries_total",
                "Total number of compare-and-swap retries by backend",
                &["backend"]
            )
            .expect("Failed to register masu_storage_cas_retries_total metric");

            let script_duration = register_histogram_vec!(
                "masu_storage_script_duration_seconds",
                "Duration of atomic storage scripts in seconds",
                &["script"],
                vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
            )
            .expect("Failed to register masu_storage_script_duration_seconds metric");

            StorageTelemetry {
                operations,
                cas_retries,
                script_duration,
            }
        })
    }

    pub fn record_operation(&self, backend: &str, operation: &str) {
        self.operations
            .with_label_values(&[backend, operation])
            .inc();
    }

    pub fn record_cas_retries(&self, backend: &str, retries: u64) {
        if retries > 0 {
            self.cas_retries.with_label_values(&[backend]).inc_by(retries);
        }
    }

    /// Start timing a script; the duration is recorded when the timer drops
    pub fn start_script_timer(&self, script: &str) -> ScriptTimer {
        ScriptTimer {
            histogram: self.script_duration.with_label_values(&[script]),
            start: std::time::Instant::now(),
        }
    }
}

/// RAII timer for script durations
pub struct ScriptTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl Drop for ScriptTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}

/// Renders the storage self-metrics in the text exposition format
pub fn self_metrics_text() -> Result<String, StorageError> {
    StorageTelemetry::global();
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| StorageError::Backend(format!("failed to encode self-metrics: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| StorageError::Backend(format!("self-metrics are not UTF-8: {}", e)))
}
