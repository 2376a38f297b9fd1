// Text exposition format renderer
//
// Output is byte-identical for the same set of families regardless of the
// order in which families or samples are supplied.

use std::cmp::Ordering;

use crate::error::{MetricsError, Result};
use crate::sample::{MetricFamilySamples, Sample};
use crate::storage::aggregate::{format_value, INF_BUCKET};

/// Content type of the rendered text
pub const MIME_TYPE: &str = "text/plain; version=0.0.4";

/// Renders families in the text exposition format
///
/// # Errors
///
/// Returns `LabelCountMismatch` when a sample's label values do not line up
/// with the family and sample label names. Nothing is rendered in that case.
pub fn render_text(families: &[MetricFamilySamples]) -> Result<String> {
    let mut ordered: Vec<&MetricFamilySamples> = families.iter().collect();
    ordered.sort_by(|a, b| a.name.cmp(&b.name));

    let mut lines = Vec::new();
    for family in ordered {
        if let Some((expected, actual)) = family.label_count_mismatch() {
            return Err(MetricsError::LabelCountMismatch {
                metric: family.name.clone(),
                expected,
                actual,
            });
        }

        lines.push(format!("# HELP {} {}", family.name, family.help));
        lines.push(format!("# TYPE {} {}", family.name, family.metric_type));

        let family_arity = family.label_names.len();
        let mut samples: Vec<&Sample> = family.samples.iter().collect();
        samples.sort_by(|a, b| compare_samples(a, b, family_arity));

        for sample in samples {
            lines.push(render_sample(family, sample));
        }
    }

    Ok(lines.join("\n") + "\n")
}

fn render_sample(family: &MetricFamilySamples, sample: &Sample) -> String {
    let names = family.label_names.iter().chain(sample.label_names.iter());
    let pairs: Vec<String> = names
        .zip(sample.label_values.iter())
        .map(|(name, value)| format!("{}=\"{}\"", name, escape_label_value(value)))
        .collect();

    if pairs.is_empty() {
        format!("{} {}", sample.name, format_value(sample.value))
    } else {
        format!(
            "{}{{{}}} {}",
            sample.name,
            pairs.join(","),
            format_value(sample.value)
        )
    }
}

/// Escapes `\`, newline and `"`, in that order
pub fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\n', "\\n")
        .replace('"', "\\\"")
}

fn compare_samples(a: &Sample, b: &Sample, family_arity: usize) -> Ordering {
    let split = |s: &Sample| {
        let at = family_arity.min(s.label_values.len());
        let (family, local) = s.label_values.split_at(at);
        (family.to_vec(), local.to_vec())
    };
    let (a_family, a_local) = split(a);
    let (b_family, b_local) = split(b);

    a_family
        .cmp(&b_family)
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| compare_local_values(&a_local, &b_local))
}

fn compare_local_values(a: &[String], b: &[String]) -> Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ordering = match (parse_bound(x), parse_bound(y)) {
            (Some(x), Some(y)) => x.total_cmp(&y),
            _ => x.cmp(y),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.len().cmp(&b.len())
}

fn parse_bound(value: &str) -> Option<f64> {
    if value == INF_BUCKET {
        return Some(f64::INFINITY);
    }
    value.parse::<f64>().ok()
}
