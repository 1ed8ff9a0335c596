use std::collections::BTreeMap;

use prost::Message;

use crate::{Batch, DataPoint, WriteRequest};

/// Default limit for the decompressed size of a request body, 64 MiB.
pub const DEFAULT_MAX_DECODED_SIZE: usize = 64 * 1024 * 1024;

/// An error decoding a remote-write request.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The body is not a valid snappy block.
    #[error("failed to decompress request body")]
    Decompression(#[source] snap::Error),
    /// The decompressed body is not a valid write request.
    #[error("malformed write request")]
    Malformed(#[source] prost::DecodeError),
    /// The body declares a decompressed size above the limit.
    #[error("decompressed request size {size} exceeds limit of {limit} bytes")]
    TooLarge {
        /// The size declared by the snappy header.
        size: usize,
        /// The configured limit.
        limit: usize,
    },
}

/// Options applied while flattening a request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DecodeOptions {
    /// Replacement for `NaN` sample values.
    pub nan_value: f64,
    /// Maximum decompressed size of a body in bytes.
    pub max_decoded_size: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            nan_value: 0.0,
            max_decoded_size: DEFAULT_MAX_DECODED_SIZE,
        }
    }
}

/// Decodes a snappy-compressed remote-write request into data points.
///
/// Every sample of every series becomes one [`DataPoint`]. Series order and sample order within
/// a series are preserved. Bodies declaring a decompressed size above
/// [`max_decoded_size`](DecodeOptions::max_decoded_size) are rejected before decompressing.
pub fn decode_write_request(body: &[u8], options: DecodeOptions) -> Result<Batch, DecodeError> {
    let size = snap::raw::decompress_len(body).map_err(DecodeError::Decompression)?;
    if size > options.max_decoded_size {
        return Err(DecodeError::TooLarge {
            size,
            limit: options.max_decoded_size,
        });
    }

    let raw = snap::raw::Decoder::new()
        .decompress_vec(body)
        .map_err(DecodeError::Decompression)?;

    let request = WriteRequest::decode(raw.as_slice()).map_err(DecodeError::Malformed)?;
    Ok(flatten(request, options))
}

/// Flattens a decoded request into data points.
pub fn flatten(request: WriteRequest, options: DecodeOptions) -> Batch {
    let capacity = request.timeseries.iter().map(|ts| ts.samples.len()).sum();
    let mut batch = Vec::with_capacity(capacity);

    for series in request.timeseries {
        let labels: BTreeMap<String, String> = series
            .labels
            .into_iter()
            .map(|label| (label.name, label.value))
            .collect();

        for sample in series.samples {
            let point = DataPoint::new(labels.clone(), sample.value, sample.timestamp)
                .substitute_nan(options.nan_value);
            batch.push(point);
        }
    }

    batch
}

/// Encodes and compresses a write request the way collectors send it.
pub fn encode_write_request(request: &WriteRequest) -> Result<Vec<u8>, snap::Error> {
    snap::raw::Encoder::new().compress_vec(&request.encode_to_vec())
}
