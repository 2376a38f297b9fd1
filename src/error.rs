// Error types module

use thiserror::Error;

use crate::storage::StorageError;

/// Centralized error type for the instrumentation client
///
/// Validation, registration and lookup errors indicate caller misuse and are
/// never retried. Storage errors are surfaced as-is; the caller decides
/// whether to retry.
#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Invalid metric name: '{0}'")]
    InvalidMetricName(String),

    #[error("Invalid label name: '{0}'")]
    InvalidLabelName(String),

    #[error("Label name '{0}' is reserved")]
    ReservedLabelName(String),

    #[error("Metric '{metric}' expects {expected} label values, got {actual}")]
    LabelArity {
        metric: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid histogram buckets: {0}")]
    InvalidBuckets(String),

    #[error("Counter '{metric}' can only be incremented by a positive value, got {value}")]
    NonPositiveIncrement { metric: String, value: f64 },

    #[error("{kind} '{name}' is already registered")]
    AlreadyRegistered { kind: &'static str, name: String },

    #[error("{kind} '{name}' is not registered")]
    NotFound { kind: &'static str, name: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Metric '{metric}' has {expected} label names but a sample carries {actual} label values")]
    LabelCountMismatch {
        metric: String,
        expected: usize,
        actual: usize,
    },

    #[error("Push gateway error: {0}")]
    PushGateway(String),
}

pub type Result<T> = std::result::Result<T, MetricsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_count_mismatch_names_metric_and_counts() {
        let err = MetricsError::LabelCountMismatch {
            metric: "http_requests_total".to_string(),
            expected: 2,
            actual: 1,
        };
        let msg = err.to_string();
        assert!(msg.contains("http_requests_total"));
        assert!(msg.contains('2'));
        assert!(msg.contains('1'));
    }

    #[test]
    fn test_storage_error_converts_into_metrics_error() {
        let err: MetricsError = StorageError::ConnectionFailed("refused".to_string()).into();
        assert!(matches!(
            err,
            MetricsError::Storage(StorageError::ConnectionFailed(_))
        ));
    }

    #[test]
    fn test_registration_error_display() {
        let err = MetricsError::AlreadyRegistered {
            kind: "counter",
            name: "jobs_total".to_string(),
        };
        assert_eq!(err.to_string(), "counter 'jobs_total' is already registered");
    }

    #[test]
    fn test_metrics_error_implements_error_trait() {
        fn assert_error<T: std::error::Error + Send + Sync + 'static>() {}
        assert_error::<MetricsError>();
    }
}
