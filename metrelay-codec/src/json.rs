use metrelay_protocol::DataPoint;

use crate::record::MetricRecord;
use crate::{Codec, DataFormat, EncodeError};

/// Encodes data points as plain JSON objects.
#[derive(Clone, Debug, Default)]
pub struct JsonCodec {
    nan_value: f64,
}

impl JsonCodec {
    /// The configuration name of this codec.
    pub const NAME: &'static str = "json";

    /// Creates a codec replacing `NaN` values with `nan_value`.
    pub fn new(nan_value: f64) -> Self {
        Self { nan_value }
    }
}

impl Codec for JsonCodec {
    fn encode(&self, point: &DataPoint) -> Result<Vec<u8>, EncodeError> {
        let record = MetricRecord::from_point(point, self.nan_value)?;
        Ok(serde_json::to_vec(&record)?)
    }

    fn data_format(&self) -> DataFormat {
        DataFormat::Json
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }
}
