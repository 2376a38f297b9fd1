// Validated identifiers for metrics and labels

use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

use crate::error::{MetricsError, Result};

/// Label name reserved for histogram bucket upper bounds
pub const BUCKET_LABEL: &str = "le";

fn metric_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("valid metric name regex"))
}

fn label_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("valid label name regex"))
}

/// A metric name matching `^[a-zA-Z_:][a-zA-Z0-9_:]*$`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricName(String);

impl MetricName {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if !metric_name_regex().is_match(&name) {
            return Err(MetricsError::InvalidMetricName(name));
        }
        Ok(Self(name))
    }

    /// Builds `namespace_name`, or just `name` when the namespace is empty
    pub fn with_namespace(namespace: &str, name: &str) -> Result<Self> {
        if namespace.is_empty() {
            Self::new(name)
        } else {
            Self::new(format!("{}_{}", namespace, name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for MetricName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn validate_label_names<I, S>(names: I, forbid_le: bool) -> Result<Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut validated = Vec::new();
    for name in names {
        let name = name.into();
        if !label_name_regex().is_match(&name) {
            return Err(MetricsError::InvalidLabelName(name));
        }
        if name.starts_with("__") || (forbid_le && name == BUCKET_LABEL) {
            return Err(MetricsError::ReservedLabelName(name));
        }
        validated.push(name);
    }
    Ok(validated)
}

/// Ordered label names of a counter or gauge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricLabelNames(Vec<String>);

impl MetricLabelNames {
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        validate_label_names(names, false).map(Self)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Ordered label names of a histogram; `le` is additionally reserved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistogramLabelNames(Vec<String>);

impl HistogramLabelNames {
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        validate_label_names(names, true).map(Self)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
