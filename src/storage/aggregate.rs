//! Collection algorithm shared by every backend
//!
//! Backends feed raw per-series values into the accumulators below; the
//! accumulators decode nothing themselves but own the ordering and the
//! histogram bucket math, so every backend produces identical output for
//! identical writes.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::BTreeMap;

use super::error::StorageError;
use super::traits::MetricMeta;
use crate::names::BUCKET_LABEL;
use crate::sample::{MetricFamilySamples, MetricType, Sample};

/// Token used for the implicit last bucket
pub const INF_BUCKET: &str = "+Inf";

/// Encodes label values as a JSON array
pub fn encode_label_values(label_values: &[String]) -> Result<String, StorageError> {
    Ok(serde_json::to_string(label_values)?)
}

pub fn decode_label_values(encoded: &str) -> Result<Vec<String>, StorageError> {
    Ok(serde_json::from_str(encoded)?)
}

/// Encodes label values for string-only key spaces: base64 of the JSON array
///
/// The result never contains `:`, so it can be embedded in colon-separated keys.
pub fn encode_label_key(label_values: &[String]) -> Result<String, StorageError> {
    Ok(STANDARD.encode(encode_label_values(label_values)?))
}

pub fn decode_label_key(encoded: &str) -> Result<Vec<String>, StorageError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| StorageError::CorruptKey(format!("invalid base64 '{}': {}", encoded, e)))?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Formats a sample value or bucket bound for the exposition format
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        INF_BUCKET.to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        format!("{}", value)
    }
}

/// Index of the first bound `b` with `value <= b`; `bounds.len()` is `+Inf`
pub fn bucket_index(bounds: &[f64], value: f64) -> usize {
    bounds
        .iter()
        .position(|bound| value <= *bound)
        .unwrap_or(bounds.len())
}

/// Maps a stored bucket label back to its index (`+Inf` is `bounds.len()`)
pub fn bucket_index_for_label(bounds: &[f64], label: &str) -> Option<usize> {
    if label == INF_BUCKET {
        return Some(bounds.len());
    }
    bounds.iter().position(|bound| format_value(*bound) == label)
}

/// Label written for bucket `index`
pub fn bucket_label(bounds: &[f64], index: usize) -> String {
    bounds
        .get(index)
        .map(|bound| format_value(*bound))
        .unwrap_or_else(|| INF_BUCKET.to_string())
}

/// Accumulates counter or gauge series, one value per label tuple
#[derive(Debug, Default)]
pub struct SeriesAccumulator {
    series: BTreeMap<Vec<String>, f64>,
}

impl SeriesAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, label_values: Vec<String>, value: f64) {
        self.series.insert(label_values, value);
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// One sample per label tuple, ordered by label values
    pub fn into_family(self, meta: &MetricMeta, metric_type: MetricType) -> MetricFamilySamples {
        let samples = self
            .series
            .into_iter()
            .map(|(label_values, value)| Sample::new(meta.name.clone(), label_values, value))
            .collect();
        MetricFamilySamples {
            name: meta.name.clone(),
            metric_type,
            help: meta.help.clone(),
            label_names: meta.label_names.clone(),
            samples,
        }
    }
}

#[derive(Debug, Default)]
struct HistogramSeries {
    sum: f64,
    counts: BTreeMap<usize, f64>,
}

/// Accumulates histogram series and rebuilds cumulative buckets
#[derive(Debug, Default)]
pub struct HistogramAccumulator {
    series: BTreeMap<Vec<String>, HistogramSeries>,
}

impl HistogramAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-cumulative count of bucket `index` for one label tuple
    pub fn record_bucket(&mut self, label_values: Vec<String>, index: usize, count: f64) {
        let series = self.series.entry(label_values).or_default();
        *series.counts.entry(index).or_insert(0.0) += count;
    }

    pub fn record_sum(&mut self, label_values: Vec<String>, sum: f64) {
        self.series.entry(label_values).or_default().sum = sum;
    }

    /// Emits `_bucket` samples for every bound plus `+Inf`, then `_count`
    /// and `_sum`, per label tuple in label-value order. Tuples without any
    /// bucket entry (only a sum so far) are skipped.
    pub fn into_family(self, meta: &MetricMeta) -> MetricFamilySamples {
        let bounds = meta.bucket_bounds();
        let bucket_name = format!("{}_bucket", meta.name);
        let mut samples = Vec::new();

        for (label_values, series) in self.series {
            if series.counts.is_empty() {
                continue;
            }
            let mut acc = 0.0;
            for index in 0..=bounds.len() {
                acc += series.counts.get(&index).copied().unwrap_or(0.0);
                let mut values = label_values.clone();
                values.push(bucket_label(bounds, index));
                samples.push(
                    Sample::new(bucket_name.clone(), values, acc)
                        .with_label_names(vec![BUCKET_LABEL.to_string()]),
                );
            }
            samples.push(Sample::new(
                format!("{}_count", meta.name),
                label_values.clone(),
                acc,
            ));
            samples.push(Sample::new(
                format!("{}_sum", meta.name),
                label_values,
                series.sum,
            ));
        }

        MetricFamilySamples {
            name: meta.name.clone(),
            metric_type: MetricType::Histogram,
            help: meta.help.clone(),
            label_names: meta.label_names.clone(),
            samples,
        }
    }
}

/// Orders families by name so every backend returns them deterministically
pub fn sort_families(families: &mut [MetricFamilySamples]) {
    families.sort_by(|a, b| a.name.cmp(&b.name));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_label_key_round_trips_awkward_values() {
        let cases = vec![
            labels(&[]),
            labels(&[""]),
            labels(&["", ""]),
            labels(&["a:b", "c,d", "e\"f", "g\nh", "\\"]),
            labels(&["日本語", "\u{0}", "tab\there"]),
        ];
        for values in cases {
            let key = encode_label_key(&values).unwrap();
            assert!(!key.contains(':'));
            assert_eq!(decode_label_key(&key).unwrap(), values);

            let json = encode_label_values(&values).unwrap();
            assert_eq!(decode_label_values(&json).unwrap(), values);
        }
    }

    #[test]
    fn test_distinct_tuples_never_share_a_key() {
        let a = encode_label_key(&labels(&["a,b"])).unwrap();
        let b = encode_label_key(&labels(&["a", "b"])).unwrap();
        let c = encode_label_key(&labels(&["ab"])).unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_label_key("***"),
            Err(StorageError::CorruptKey(_))
        ));
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(100.0), "100");
        assert_eq!(format_value(0.005), "0.005");
        assert_eq!(format_value(2.5), "2.5");
        assert_eq!(format_value(-3.0), "-3");
        assert_eq!(format_value(f64::INFINITY), "+Inf");
        assert_eq!(format_value(f64::NEG_INFINITY), "-Inf");
        assert_eq!(format_value(f64::NAN), "NaN");
    }

    #[test]
    fn test_bucket_selection_is_inclusive() {
        let bounds = [100.0, 200.0, 300.0];
        assert_eq!(bucket_index(&bounds, 50.0), 0);
        assert_eq!(bucket_index(&bounds, 100.0), 0);
        assert_eq!(bucket_index(&bounds, 100.5), 1);
        assert_eq!(bucket_index(&bounds, 300.0), 2);
        assert_eq!(bucket_index(&bounds, 301.0), 3);
        assert_eq!(bucket_label(&bounds, 3), "+Inf");
        assert_eq!(bucket_index_for_label(&bounds, "200"), Some(1));
        assert_eq!(bucket_index_for_label(&bounds, "+Inf"), Some(3));
        assert_eq!(bucket_index_for_label(&bounds, "250"), None);
    }

    #[test]
    fn test_histogram_buckets_accumulate() {
        let meta = MetricMeta::new("latency", "Latency", labels(&["route"]))
            .with_buckets(vec![100.0, 200.0, 300.0]);
        let mut acc = HistogramAccumulator::new();
        for value in [123.0, 245.0] {
            let index = bucket_index(meta.bucket_bounds(), value);
            acc.record_bucket(labels(&["/"]), index, 1.0);
        }
        acc.record_sum(labels(&["/"]), 368.0);

        let family = acc.into_family(&meta);
        let rendered: Vec<(String, Vec<String>, f64)> = family
            .samples
            .iter()
            .map(|s| (s.name.clone(), s.label_values.clone(), s.value))
            .collect();
        assert_eq!(
            rendered,
            vec![
                ("latency_bucket".to_string(), labels(&["/", "100"]), 0.0),
                ("latency_bucket".to_string(), labels(&["/", "200"]), 1.0),
                ("latency_bucket".to_string(), labels(&["/", "300"]), 2.0),
                ("latency_bucket".to_string(), labels(&["/", "+Inf"]), 2.0),
                ("latency_count".to_string(), labels(&["/"]), 2.0),
                ("latency_sum".to_string(), labels(&["/"]), 368.0),
            ]
        );
        assert_eq!(family.label_count_mismatch(), None);
    }

    #[test]
    fn test_histogram_skips_sum_only_series() {
        let meta = MetricMeta::new("latency", "Latency", vec![]).with_buckets(vec![1.0]);
        let mut acc = HistogramAccumulator::new();
        acc.record_sum(vec![], 0.5);
        assert!(acc.into_family(&meta).samples.is_empty());
    }

    #[test]
    fn test_series_sorted_by_label_values() {
        let meta = MetricMeta::new("jobs_total", "Jobs", labels(&["queue"]));
        let mut acc = SeriesAccumulator::new();
        acc.record(labels(&["zeta"]), 1.0);
        acc.record(labels(&["alpha"]), 2.0);
        acc.record(labels(&["mid"]), 3.0);
        let family = acc.into_family(&meta, MetricType::Counter);
        let order: Vec<&str> = family
            .samples
            .iter()
            .map(|s| s.label_values[0].as_str())
            .collect();
        assert_eq!(order, ["alpha", "mid", "zeta"]);
    }
}
