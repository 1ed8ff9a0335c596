//! Configuration for the metrelay CLI and server.
//!
//! The configuration is read from `config.yml` in the config directory. Every section and every
//! field is optional, a missing file yields the defaults:
//!
//! ```yaml
//! server:
//!   host: 0.0.0.0
//!   port: 9201
//!   write_path: /write
//! filter:
//!   mode: deny
//!   names: [go_gc_duration_seconds]
//! sink:
//!   connection_string: Endpoint=sb://myns.servicebus.windows.net/;...
//!   batch: true
//!   serializer: json
//! pipeline:
//!   nan_value: 0.0
//!   max_decoded_size: 67108864
//! logging:
//!   level: info
//! metrics:
//!   statsd: 127.0.0.1:8125
//! ```
//!
//! Values from the command line and environment are applied on top with
//! [`Config::apply_override`].
#![warn(missing_docs)]

mod config;

pub use self::config::*;
