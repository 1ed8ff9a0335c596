use std::sync::Arc;

use metrelay_config::Config;
use metrelay_eventhub::Dispatcher;
use metrelay_statsd::MetricsClient;

use crate::pipeline::Pipeline;

#[derive(Debug)]
struct StateInner {
    config: Arc<Config>,
    pipeline: Arc<Pipeline>,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<MetricsClient>,
}

/// Server state shared by all endpoints.
#[derive(Clone, Debug)]
pub struct ServiceState {
    inner: Arc<StateInner>,
}

impl ServiceState {
    /// Creates the state.
    pub fn new(
        config: Arc<Config>,
        pipeline: Arc<Pipeline>,
        dispatcher: Arc<Dispatcher>,
        metrics: Arc<MetricsClient>,
    ) -> Self {
        Self {
            inner: Arc::new(StateInner {
                config,
                pipeline,
                dispatcher,
                metrics,
            }),
        }
    }

    /// Returns the current config.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Returns the write pipeline.
    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    /// Returns the dispatcher owning the event hub connection.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Returns the metrics client.
    pub fn metrics(&self) -> &MetricsClient {
        &self.inner.metrics
    }
}
