use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat};
use metrelay_protocol::DataPoint;
use serde::Serialize;

use crate::EncodeError;

/// The logical object emitted by every codec.
#[derive(Debug, Serialize)]
pub(crate) struct MetricRecord<'a> {
    pub timestamp: String,
    pub value: f64,
    pub name: &'a str,
    pub labels: BTreeMap<&'a str, &'a str>,
}

impl<'a> MetricRecord<'a> {
    pub fn from_point(point: &'a DataPoint, nan_value: f64) -> Result<Self, EncodeError> {
        let timestamp = DateTime::from_timestamp_millis(point.timestamp())
            .ok_or(EncodeError::Timestamp(point.timestamp()))?
            .to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut value = point.value();
        if value.is_nan() {
            metrelay_log::warn!(sample_name = point.name(), "sample value NaN not supported");
            value = nan_value;
        }

        Ok(Self {
            timestamp,
            value,
            name: point.name(),
            labels: point.labels_without_name().collect(),
        })
    }
}
