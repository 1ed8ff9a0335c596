use std::sync::Arc;

use crate::{
    Connector, CredentialStrategy, HubTarget, HubTransport, RuntimeInfo, SinkConfig, SinkError,
    TransportError, resolve_credential,
};

/// An open, verified connection to one event hub.
#[derive(Clone, Debug)]
pub struct HubConnection {
    transport: Arc<dyn HubTransport>,
    target: HubTarget,
    strategy: CredentialStrategy,
    runtime: RuntimeInfo,
}

impl HubConnection {
    /// Resolves credentials, opens a transport and fetches the hub's runtime information.
    ///
    /// The runtime information is requested exactly once, bounded by the configured request
    /// timeout. Any failure fails the connection.
    pub async fn connect(config: &SinkConfig, connector: &dyn Connector) -> Result<Self, SinkError> {
        let credential = resolve_credential(config)?;
        let target = credential.target.clone();
        let strategy = credential.strategy;

        let transport = connector.transport(config, credential)?;

        let runtime = tokio::time::timeout(config.request_timeout(), transport.runtime_info())
            .await
            .map_err(|_| SinkError::Timeout)?
            .map_err(SinkError::RuntimeInfo)?;

        metrelay_log::info!(
            hub = %target,
            strategy = strategy.as_str(),
            partitions = runtime.partition_count,
            "connected to event hub"
        );

        Ok(Self {
            transport,
            target,
            strategy,
            runtime,
        })
    }

    /// The transport submitting events.
    pub fn transport(&self) -> &dyn HubTransport {
        self.transport.as_ref()
    }

    /// The destination hub.
    pub fn target(&self) -> &HubTarget {
        &self.target
    }

    /// The strategy used to authorize requests.
    pub fn strategy(&self) -> CredentialStrategy {
        self.strategy
    }

    /// The runtime information fetched while connecting.
    pub fn runtime(&self) -> &RuntimeInfo {
        &self.runtime
    }

    /// Closes the underlying transport.
    pub async fn close(&self) -> Result<(), TransportError> {
        self.transport.close().await
    }
}
