//! In-memory transport for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    Connector, HubMessage, HubTransport, ResolvedCredential, RuntimeInfo, SinkConfig, SinkError,
    TransportError,
};

/// A [`HubTransport`] recording everything submitted to it.
#[derive(Debug, Default)]
pub struct MockTransport {
    batches: Mutex<Vec<Vec<HubMessage>>>,
    messages: Mutex<Vec<HubMessage>>,
    failing_sends: Mutex<Vec<usize>>,
    send_calls: AtomicUsize,
    runtime_calls: AtomicUsize,
    close_calls: AtomicUsize,
    fail_runtime_info: bool,
    fail_batches: bool,
    delay: Option<Duration>,
    closed: AtomicBool,
}

impl MockTransport {
    /// Creates a transport accepting every call.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every runtime information request.
    pub fn fail_runtime_info(mut self) -> Self {
        self.fail_runtime_info = true;
        self
    }

    /// Fails every batch submission.
    pub fn fail_batches(mut self) -> Self {
        self.fail_batches = true;
        self
    }

    /// Fails the single send with the given zero-based call index.
    pub fn fail_send(self, index: usize) -> Self {
        self.failing_sends.lock().push(index);
        self
    }

    /// Delays every call by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// All submitted batches, in order.
    pub fn batches(&self) -> Vec<Vec<HubMessage>> {
        self.batches.lock().clone()
    }

    /// All successfully submitted single messages, in order.
    pub fn messages(&self) -> Vec<HubMessage> {
        self.messages.lock().clone()
    }

    /// Number of single send calls, including failed ones.
    pub fn send_calls(&self) -> usize {
        self.send_calls.load(Ordering::SeqCst)
    }

    /// Number of runtime information requests.
    pub fn runtime_calls(&self) -> usize {
        self.runtime_calls.load(Ordering::SeqCst)
    }

    /// Number of close calls.
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        match self.closed.load(Ordering::SeqCst) {
            true => Err(TransportError::Closed),
            false => Ok(()),
        }
    }

    fn rejected() -> TransportError {
        TransportError::Status {
            status: 503,
            body: "server busy".to_owned(),
        }
    }
}

#[async_trait]
impl HubTransport for MockTransport {
    async fn runtime_info(&self) -> Result<RuntimeInfo, TransportError> {
        self.runtime_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        self.ensure_open()?;

        if self.fail_runtime_info {
            return Err(Self::rejected());
        }

        Ok(RuntimeInfo {
            path: "metrics".to_owned(),
            partition_count: 4,
            created_at: None,
        })
    }

    async fn send(&self, message: HubMessage) -> Result<(), TransportError> {
        let index = self.send_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        self.ensure_open()?;

        if self.failing_sends.lock().contains(&index) {
            return Err(Self::rejected());
        }

        self.messages.lock().push(message);
        Ok(())
    }

    async fn send_batch(&self, messages: Vec<HubMessage>) -> Result<(), TransportError> {
        self.delay().await;
        self.ensure_open()?;

        if self.fail_batches {
            return Err(Self::rejected());
        }

        self.batches.lock().push(messages);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A [`Connector`] handing out [`MockTransport`]s.
///
/// Each connection receives the next transport in order. Once all are used, the last one is
/// reused.
#[derive(Debug)]
pub struct MockConnector {
    transports: Vec<Arc<MockTransport>>,
    connects: AtomicUsize,
}

impl MockConnector {
    /// Creates a connector returning `transport`.
    pub fn new(transport: Arc<MockTransport>) -> Self {
        Self {
            transports: vec![transport],
            connects: AtomicUsize::new(0),
        }
    }

    /// Hands out `transport` to the next connection.
    pub fn then(mut self, transport: Arc<MockTransport>) -> Self {
        self.transports.push(transport);
        self
    }

    /// Number of transports created.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn transport(
        &self,
        _config: &SinkConfig,
        _credential: ResolvedCredential,
    ) -> Result<Arc<dyn HubTransport>, SinkError> {
        let index = self.connects.fetch_add(1, Ordering::SeqCst);
        let transport = &self.transports[index.min(self.transports.len() - 1)];
        Ok(transport.clone())
    }
}
