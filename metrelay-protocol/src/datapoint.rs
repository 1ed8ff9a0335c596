use std::collections::BTreeMap;

use serde::Serialize;

/// The reserved label carrying the metric name.
pub const NAME_LABEL: &str = "__name__";

/// Name assigned to data points whose label set lacks [`NAME_LABEL`].
pub const DEFAULT_METRIC_NAME: &str = "no_name";

/// An ordered sequence of data points from one inbound request.
pub type Batch = Vec<DataPoint>;

/// A single observation of a time series.
///
/// The label map always contains [`NAME_LABEL`]. Construct data points through [`DataPoint::new`]
/// to uphold this.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DataPoint {
    labels: BTreeMap<String, String>,
    value: f64,
    timestamp: i64,
}

impl DataPoint {
    /// Creates a data point, synthesizing the name label if it is missing.
    ///
    /// `timestamp` is in milliseconds since the UNIX epoch.
    pub fn new(mut labels: BTreeMap<String, String>, value: f64, timestamp: i64) -> Self {
        if !labels.contains_key(NAME_LABEL) {
            labels.insert(NAME_LABEL.to_owned(), DEFAULT_METRIC_NAME.to_owned());
        }

        Self {
            labels,
            value,
            timestamp,
        }
    }

    /// Replaces a `NaN` value with `substitute`.
    ///
    /// `NaN` is not representable by downstream formats.
    pub fn substitute_nan(mut self, substitute: f64) -> Self {
        if self.value.is_nan() {
            metrelay_log::warn!(
                sample_name = self.name(),
                substitute,
                "sample value NaN not supported"
            );
            self.value = substitute;
        }
        self
    }

    /// The metric name of this point.
    pub fn name(&self) -> &str {
        self.labels
            .get(NAME_LABEL)
            .map_or(DEFAULT_METRIC_NAME, String::as_str)
    }

    /// All labels, including the name label.
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Returns the value of the label with the given name.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    /// Iterates all labels except the name label.
    pub fn labels_without_name(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels
            .iter()
            .filter(|(k, _)| k.as_str() != NAME_LABEL)
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// The sample value.
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Milliseconds since the UNIX epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn test_name_synthesized_once() {
        let point = DataPoint::new(labels(&[("job", "node")]), 1.0, 0);
        assert_eq!(point.name(), DEFAULT_METRIC_NAME);
        assert_eq!(point.labels().len(), 2);
        assert_eq!(
            point
                .labels()
                .keys()
                .filter(|k| k.as_str() == NAME_LABEL)
                .count(),
            1
        );
    }

    #[test]
    fn test_existing_name_kept() {
        let point = DataPoint::new(labels(&[(NAME_LABEL, "up"), ("job", "node")]), 1.0, 0);
        assert_eq!(point.name(), "up");
        let rest: Vec<_> = point.labels_without_name().collect();
        assert_eq!(rest, [("job", "node")]);
    }

    #[test]
    fn test_substitute_nan() {
        let point = DataPoint::new(labels(&[(NAME_LABEL, "up")]), f64::NAN, 0).substitute_nan(0.0);
        assert_eq!(point.value(), 0.0);

        let point = DataPoint::new(labels(&[(NAME_LABEL, "up")]), 3.5, 0).substitute_nan(0.0);
        assert_eq!(point.value(), 3.5);
    }
}
