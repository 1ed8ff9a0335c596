//! Data model and ingestion decoding for metrelay.
//!
//! Collectors push samples using the Prometheus remote-write protocol: a snappy block-compressed,
//! protobuf-framed [`WriteRequest`] carrying one or more time series. [`decode_write_request`]
//! flattens such a request into an ordered [`Batch`] of [`DataPoint`]s, which is what the rest of
//! the pipeline operates on.

#![warn(missing_docs)]

mod datapoint;
mod decode;
mod remote_write;

pub use self::datapoint::*;
pub use self::decode::*;
pub use self::remote_write::*;
