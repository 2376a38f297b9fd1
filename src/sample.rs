// Sample model shared by storage backends and the renderer

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a metric family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
}

impl MetricType {
    pub const ALL: [MetricType; 3] = [MetricType::Counter, MetricType::Gauge, MetricType::Histogram];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
            MetricType::Histogram => "histogram",
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One output line: a sample name, its value and label values
///
/// `label_names` only holds labels local to this sample (e.g. `le` on a
/// histogram bucket). `label_values` covers the family's label names
/// followed by the sample-local ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub name: String,
    pub label_names: Vec<String>,
    pub label_values: Vec<String>,
    pub value: f64,
}

impl Sample {
    pub fn new(name: impl Into<String>, label_values: Vec<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            label_names: Vec::new(),
            label_values,
            value,
        }
    }

    pub fn with_label_names(mut self, label_names: Vec<String>) -> Self {
        self.label_names = label_names;
        self
    }
}

/// All samples of one metric name, with its type and help text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFamilySamples {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    pub help: String,
    pub label_names: Vec<String>,
    pub samples: Vec<Sample>,
}

impl MetricFamilySamples {
    /// Returns the first sample whose label value count disagrees with the
    /// declared label names, as `(expected, actual)`.
    pub fn label_count_mismatch(&self) -> Option<(usize, usize)> {
        self.samples.iter().find_map(|sample| {
            let expected = self.label_names.len() + sample.label_names.len();
            let actual = sample.label_values.len();
            (expected != actual).then_some((expected, actual))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(samples: Vec<Sample>) -> MetricFamilySamples {
        MetricFamilySamples {
            name: "latency_seconds".to_string(),
            metric_type: MetricType::Histogram,
            help: "Request latency".to_string(),
            label_names: vec!["route".to_string()],
            samples,
        }
    }

    #[test]
    fn test_metric_type_renders_lowercase() {
        assert_eq!(MetricType::Counter.to_string(), "counter");
        assert_eq!(MetricType::Gauge.as_str(), "gauge");
        assert_eq!(
            serde_json::to_string(&MetricType::Histogram).unwrap(),
            "\"histogram\""
        );
    }

    #[test]
    fn test_consistent_family_has_no_mismatch() {
        let fam = family(vec![
            Sample::new(
                "latency_seconds_bucket",
                vec!["/".to_string(), "0.1".to_string()],
                1.0,
            )
            .with_label_names(vec!["le".to_string()]),
            Sample::new("latency_seconds_count", vec!["/".to_string()], 1.0),
        ]);
        assert_eq!(fam.label_count_mismatch(), None);
    }

    #[test]
    fn test_mismatch_reports_expected_and_actual() {
        let fam = family(vec![Sample::new("latency_seconds_sum", vec![], 0.5)]);
        assert_eq!(fam.label_count_mismatch(), Some((1, 0)));
    }
}
