use apache_avro::Schema;
use apache_avro::types::Value;
use metrelay_protocol::DataPoint;

use crate::record::MetricRecord;
use crate::{Codec, DataFormat, EncodeError};

/// The record schema every payload is validated against.
pub const METRIC_SCHEMA: &str = r#"{
    "namespace": "io.prometheus",
    "type": "record",
    "name": "Metric",
    "doc": "A basic schema for representing Prometheus metrics",
    "fields": [
        {"name": "timestamp", "type": "string"},
        {"name": "value", "type": "double"},
        {"name": "name", "type": "string"},
        {"name": "labels", "type": {"type": "map", "values": "string"}}
    ]
}"#;

/// Encodes data points as Avro records in the Avro JSON encoding.
///
/// The schema is parsed once at construction and shared by all encode calls.
#[derive(Clone, Debug)]
pub struct AvroJsonCodec {
    schema: Schema,
    nan_value: f64,
}

impl AvroJsonCodec {
    /// The configuration name of this codec.
    pub const NAME: &'static str = "avro-json";

    /// Creates a codec replacing `NaN` values with `nan_value`.
    pub fn new(nan_value: f64) -> Result<Self, EncodeError> {
        let schema = Schema::parse_str(METRIC_SCHEMA)?;
        Ok(Self { schema, nan_value })
    }

    /// The parsed record schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn to_value(&self, record: &MetricRecord<'_>) -> Result<Value, EncodeError> {
        let value = apache_avro::to_value(record)?;
        Ok(value.resolve(&self.schema)?)
    }
}

impl Codec for AvroJsonCodec {
    fn encode(&self, point: &DataPoint) -> Result<Vec<u8>, EncodeError> {
        let record = MetricRecord::from_point(point, self.nan_value)?;
        let value = self.to_value(&record)?;
        let json = serde_json::Value::try_from(value)?;
        Ok(serde_json::to_vec(&json)?)
    }

    fn data_format(&self) -> DataFormat {
        DataFormat::Json
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }
}
