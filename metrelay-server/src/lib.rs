//! The server of metrelay.
//!
//! The server accepts Prometheus remote write requests, filters the contained samples and
//! forwards them to an event hub:
//!
//! ```text
//!  POST /write ──► decode ──► filter ──► dispatch ──► event hub
//!                                            │
//!                                            └──► throughput monitor
//! ```
//!
//! [`run`] wires up all parts. The event hub connection is established and verified before the
//! listener is bound, so a misconfigured sink fails startup. On `SIGINT` or `SIGTERM` the server
//! stops accepting requests, drains in-flight requests for at most the configured shutdown
//! timeout, and finally closes the event hub connection.

#![warn(missing_docs)]

mod endpoints;
mod middlewares;
mod pipeline;
mod server;
mod service;
mod statsd;
mod throughput;

#[cfg(test)]
mod testutils;

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use metrelay_config::Config;
use metrelay_eventhub::{Connector, Dispatcher, RestConnector};
use metrelay_log::LogError;
use metrelay_statsd::{MetricsClient, metric};

pub use self::pipeline::{Pipeline, RequestError, RequestOutcome};
pub use self::server::{HttpServer, ServerError, make_app, shutdown_signal};
pub use self::service::ServiceState;
pub use self::throughput::ThroughputMonitor;

use crate::statsd::{ServerCounters, ServerGauges};

/// Runs the server until a shutdown signal is received.
///
/// This creates the async runtime and blocks the current thread.
pub fn run(config: Config, metrics: MetricsClient) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("metrelay-worker")
        .enable_all()
        .build()
        .context("failed to create the async runtime")?;

    runtime.block_on(serve(
        Arc::new(config),
        Arc::new(RestConnector),
        Arc::new(metrics),
        shutdown_signal(),
    ))
}

/// Connects to the event hub and serves requests until `shutdown` resolves.
pub async fn serve<F>(
    config: Arc<Config>,
    connector: Arc<dyn Connector>,
    metrics: Arc<MetricsClient>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    metric!(metrics, counter(ServerCounters::ServerStarting) += 1);
    metric!(
        metrics,
        gauge(ServerGauges::AdapterInfo) = 1u64,
        version = env!("CARGO_PKG_VERSION"),
    );

    let dispatcher = Dispatcher::connect(
        config.sink(),
        config.nan_value(),
        connector,
        metrics.clone(),
    )
    .await
    .context("failed to connect to the event hub")?;
    let dispatcher = Arc::new(dispatcher);

    let throughput = Arc::new(ThroughputMonitor::new(config.throughput_interval()));
    throughput.start();

    let pipeline = Arc::new(Pipeline::new(
        &config,
        dispatcher.clone(),
        throughput,
        metrics.clone(),
    ));
    let state = ServiceState::new(config, pipeline, dispatcher.clone(), metrics);

    let server = HttpServer::bind(state)
        .await
        .context("failed to start the http server")?;
    let drained = server.serve(shutdown).await;

    // The connection is closed once no more requests are accepted, even if serving failed.
    if let Err(error) = dispatcher.close().await {
        metrelay_log::error!("failed to close event hub connection: {}", LogError(&error));
    }

    if !drained.context("http server failed")? {
        metrelay_log::warn!("shut down with unfinished requests");
    }

    metrelay_log::info!("shutdown complete");
    Ok(())
}
