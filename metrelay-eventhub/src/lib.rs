//! The event hub sink.
//!
//! Data points leave the relay through this crate. Building a sink happens in three steps:
//!
//! 1. [`resolve_credential`] picks one authentication strategy from the [`SinkConfig`] and
//!    produces a [`ResolvedCredential`] with the destination hub and a token provider.
//! 2. A [`Connector`] turns the credential into a [`HubTransport`]. In production this is the
//!    [`RestConnector`] talking to the HTTPS endpoint of the namespace.
//! 3. [`HubConnection::connect`] fetches the runtime information of the hub once to verify the
//!    destination.
//!
//! The resulting connection is owned by a [`Dispatcher`], which encodes and submits data points
//! in batch or single mode.
//!
//! # Example
//!
//! ```no_run
//! # async fn example() -> Result<(), metrelay_eventhub::SinkError> {
//! use std::sync::Arc;
//! use metrelay_eventhub::{Dispatcher, RestConnector, SinkConfig};
//! use metrelay_statsd::MetricsClient;
//!
//! let config = SinkConfig {
//!     connection_string: Some("Endpoint=sb://ns.servicebus.windows.net/;...".to_owned()),
//!     ..Default::default()
//! };
//!
//! let metrics = Arc::new(MetricsClient::noop());
//! let dispatcher = Dispatcher::connect(&config, 0.0, Arc::new(RestConnector), metrics).await?;
//! # Ok(())
//! # }
//! ```
#![warn(missing_docs)]

pub mod auth;
mod config;
mod connection;
mod connection_string;
mod dispatcher;
mod resolver;
mod statsd;
mod transport;

#[cfg(any(test, feature = "test"))]
pub mod testutils;

pub use self::config::*;
pub use self::connection::*;
pub use self::connection_string::*;
pub use self::dispatcher::*;
pub use self::resolver::*;
pub use self::transport::*;

use metrelay_codec::CodecError;

/// An error constructing the sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// No credential strategy could be resolved.
    #[error("unable to determine destination connection; missing or invalid configuration")]
    Configuration,
    /// The runtime information of the hub could not be fetched.
    #[error("failed to fetch event hub runtime information")]
    RuntimeInfo(#[source] TransportError),
    /// Fetching the runtime information timed out.
    #[error("timed out fetching event hub runtime information")]
    Timeout,
    /// The configured serializer is invalid.
    #[error("invalid serializer")]
    Codec(#[from] CodecError),
    /// The HTTP client could not be created.
    #[error("failed to create http client")]
    Client(#[source] reqwest::Error),
    /// The sink has been closed and accepts no new connections.
    #[error("sink is closed")]
    Closed,
}
