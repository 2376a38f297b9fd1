// Redis key and hash field formatting

use serde::{Deserialize, Serialize};

use crate::sample::MetricType;
use crate::storage::aggregate::{decode_label_values, encode_label_values};
use crate::storage::error::StorageError;

/// Hash field holding the JSON metadata record
pub const META_FIELD: &str = "__meta";
/// Hash field holding the canonical bucket list of a histogram
pub const BUCKETS_FIELD: &str = "__buckets";
/// Bucket marker of the histogram sum field
pub const SUM_MARKER: &str = "sum";

/// Formats the hash key of one metric
///
/// # Format
/// "{prefix}:{type}:{name}"
pub fn metric_key(prefix: &str, metric_type: MetricType, name: &str) -> String {
    format!("{}:{}:{}", prefix, metric_type, name)
}

/// Formats the index set listing every hash of one metric type
///
/// # Format
/// "{prefix}:index:{type}"
pub fn index_key(prefix: &str, metric_type: MetricType) -> String {
    format!("{}:index:{}", prefix, metric_type)
}

/// Hash field of a counter or gauge series: the JSON label value array
pub fn series_field(label_values: &[String]) -> Result<String, StorageError> {
    encode_label_values(label_values)
}

pub fn parse_series_field(field: &str) -> Result<Vec<String>, StorageError> {
    decode_label_values(field)
}

/// Hash field of one histogram bucket (or the sum)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramField {
    pub b: String,
    #[serde(rename = "labelValues")]
    pub label_values: Vec<String>,
}

impl HistogramField {
    pub fn new(bucket: impl Into<String>, label_values: &[String]) -> Self {
        Self {
            b: bucket.into(),
            label_values: label_values.to_vec(),
        }
    }

    pub fn encode(&self) -> Result<String, StorageError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(field: &str) -> Result<Self, StorageError> {
        Ok(serde_json::from_str(field)?)
    }

    pub fn is_sum(&self) -> bool {
        self.b == SUM_MARKER
    }
}

/// True for bookkeeping fields that carry no series value
pub fn is_reserved_field(field: &str) -> bool {
    field == META_FIELD || field == BUCKETS_FIELD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_key_format() {
        assert_eq!(
            metric_key("masu", MetricType::Counter, "jobs_total"),
            "masu:counter:jobs_total"
        );
    }

    #[test]
    fn test_index_key_cannot_collide_with_metric_keys() {
        let index = index_key("masu", MetricType::Gauge);
        assert_eq!(index, "masu:index:gauge");
        for metric_type in MetricType::ALL {
            assert_ne!(metric_key("masu", metric_type, "gauge"), index);
        }
    }

    #[test]
    fn test_series_field_round_trip() {
        let labels = vec!["a\"b".to_string(), String::new(), "c\nd".to_string()];
        let field = series_field(&labels).unwrap();
        assert_eq!(parse_series_field(&field).unwrap(), labels);
    }

    #[test]
    fn test_histogram_field_round_trip() {
        let labels = vec!["GET".to_string()];
        let field = HistogramField::new("0.25", &labels);
        let encoded = field.encode().unwrap();
        assert_eq!(encoded, r#"{"b":"0.25","labelValues":["GET"]}"#);
        let decoded = HistogramField::decode(&encoded).unwrap();
        assert_eq!(decoded, field);
        assert!(!decoded.is_sum());
        assert!(HistogramField::new(SUM_MARKER, &labels).is_sum());
    }

    #[test]
    fn test_reserved_fields() {
        assert!(is_reserved_field("__meta"));
        assert!(is_reserved_field("__buckets"));
        assert!(!is_reserved_field("[]"));
    }
}
