//! Encodes data points into the payloads delivered to the event hub.
//!
//! Every codec implements [`Codec`]. Two variants exist:
//!
//! - `json`: a plain JSON object, see [`JsonCodec`].
//! - `avro-json`: the same object validated against a fixed Avro record schema and written in the
//!   Avro JSON encoding, see [`AvroJsonCodec`].
//!
//! Both emit objects of this shape:
//!
//! ```json
//! {"timestamp":"2024-01-01T00:00:00Z","value":1.0,"name":"up","labels":{"job":"node"}}
//! ```
//!
//! Codecs are selected by name with [`codec_from_name`].
#![warn(missing_docs)]

mod avro;
mod format;
mod json;
mod record;

use std::sync::Arc;

use metrelay_protocol::DataPoint;

pub use self::avro::*;
pub use self::format::*;
pub use self::json::*;

/// An error encoding a single data point.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    /// The timestamp cannot be represented as a date.
    #[error("timestamp {0} out of range")]
    Timestamp(i64),
    /// JSON serialization failed.
    #[error("json serialization failed")]
    Json(#[from] serde_json::Error),
    /// The record does not conform to the schema.
    #[error("record does not match schema")]
    Schema(#[from] Box<apache_avro::Error>),
}

impl From<apache_avro::Error> for EncodeError {
    fn from(error: apache_avro::Error) -> Self {
        Self::Schema(Box::new(error))
    }
}

/// Encodes data points into byte payloads.
pub trait Codec: Send + Sync {
    /// Encodes one data point.
    fn encode(&self, point: &DataPoint) -> Result<Vec<u8>, EncodeError>;

    /// The ingestion format of the encoded payloads.
    fn data_format(&self) -> DataFormat;

    /// The configuration name of this codec.
    fn name(&self) -> &'static str;
}

/// The configured codec name is not known.
#[derive(Debug, thiserror::Error)]
#[error("unknown serializer {0:?}, expected \"json\" or \"avro-json\"")]
pub struct UnknownCodec(pub String);

/// An error creating a codec.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The configured codec name is not known.
    #[error(transparent)]
    Unknown(#[from] UnknownCodec),
    /// The codec could not be constructed.
    #[error("failed to create codec")]
    Create(#[from] EncodeError),
}

/// Creates the codec registered under `name`.
///
/// `nan_value` replaces `NaN` sample values during encoding.
pub fn codec_from_name(name: &str, nan_value: f64) -> Result<Arc<dyn Codec>, CodecError> {
    match name.to_ascii_lowercase().as_str() {
        JsonCodec::NAME => Ok(Arc::new(JsonCodec::new(nan_value))),
        AvroJsonCodec::NAME => Ok(Arc::new(AvroJsonCodec::new(nan_value)?)),
        _ => Err(UnknownCodec(name.to_owned()).into()),
    }
}
