// Shared segment key formatting and parsing

use crate::sample::MetricType;
use crate::storage::aggregate::encode_label_key;
use crate::storage::error::StorageError;

/// Field suffix of counter and gauge values
pub const VALUE_FIELD: &str = "value";
/// Field suffix of histogram sums
pub const SUM_FIELD: &str = "sum";
const META_SUFFIX: &str = ":meta";

/// Formats the metadata key of a metric
///
/// # Format
/// "{prefix}:{type}:{name}:meta"
pub fn meta_key(prefix: &str, metric_type: MetricType, name: &str) -> String {
    format!("{}:{}:{}{}", prefix, metric_type, name, META_SUFFIX)
}

/// Formats the key of one stored value
///
/// # Format
/// "{prefix}:{type}:{name}:{base64(json(label_values))}:{field}"
///
/// `field` is `value`, `sum` or a histogram bucket label. Metric names may
/// contain `:`, but neither the encoded labels nor the field do, so keys are
/// parsed from the right.
pub fn value_key(
    prefix: &str,
    metric_type: MetricType,
    name: &str,
    label_values: &[String],
    field: &str,
) -> Result<String, StorageError> {
    Ok(format!(
        "{}:{}:{}:{}:{}",
        prefix,
        metric_type,
        name,
        encode_label_key(label_values)?,
        field
    ))
}

/// Key space prefix owned by this library
pub fn namespace(prefix: &str) -> String {
    format!("{}:", prefix)
}

/// A decoded segment key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedKey {
    Meta {
        metric_type: MetricType,
        name: String,
    },
    Value {
        metric_type: MetricType,
        name: String,
        labels: String,
        field: String,
    },
}

fn parse_type(raw: &str) -> Option<MetricType> {
    MetricType::ALL.into_iter().find(|t| t.as_str() == raw)
}

/// Parses a key written by [`meta_key`] or [`value_key`]
///
/// Returns `None` for keys outside `prefix` or with an unknown type.
pub fn parse_key(prefix: &str, key: &str) -> Option<ParsedKey> {
    let rest = key.strip_prefix(prefix)?.strip_prefix(':')?;
    let (raw_type, rest) = rest.split_once(':')?;
    let metric_type = parse_type(raw_type)?;

    if let Some(name) = rest.strip_suffix(META_SUFFIX) {
        return Some(ParsedKey::Meta {
            metric_type,
            name: name.to_string(),
        });
    }

    let mut parts = rest.rsplitn(3, ':');
    let field = parts.next()?;
    let labels = parts.next()?;
    let name = parts.next()?;
    if name.is_empty() {
        return None;
    }
    Some(ParsedKey::Value {
        metric_type,
        name: name.to_string(),
        labels: labels.to_string(),
        field: field.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::aggregate::decode_label_key;

    #[test]
    fn test_meta_key_format() {
        assert_eq!(
            meta_key("masu", MetricType::Counter, "jobs_total"),
            "masu:counter:jobs_total:meta"
        );
    }

    #[test]
    fn test_value_key_round_trip() {
        let labels = vec!["a:b".to_string(), String::new()];
        let key = value_key("masu", MetricType::Histogram, "rpc:latency", &labels, "0.25").unwrap();
        match parse_key("masu", &key) {
            Some(ParsedKey::Value {
                metric_type,
                name,
                labels: encoded,
                field,
            }) => {
                assert_eq!(metric_type, MetricType::Histogram);
                assert_eq!(name, "rpc:latency");
                assert_eq!(field, "0.25");
                assert_eq!(decode_label_key(&encoded).unwrap(), labels);
            }
            other => panic!("unexpected parse result: {:?}", other),
        }
    }

    #[test]
    fn test_meta_key_with_colon_name() {
        let key = meta_key("masu", MetricType::Gauge, "a:b:c");
        assert_eq!(
            parse_key("masu", &key),
            Some(ParsedKey::Meta {
                metric_type: MetricType::Gauge,
                name: "a:b:c".to_string()
            })
        );
    }

    #[test]
    fn test_foreign_keys_are_ignored() {
        assert_eq!(parse_key("masu", "other:counter:x:meta"), None);
        assert_eq!(parse_key("masu", "masuX:counter:x:meta"), None);
        assert_eq!(parse_key("masu", "masu:summary:x:meta"), None);
        assert_eq!(parse_key("masu", "masu:counter:onlyname"), None);
    }
}
