use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use metrelay_codec::{Codec, codec_from_name};
use metrelay_log::LogError;
use metrelay_protocol::DataPoint;
use metrelay_statsd::{MetricsClient, metric};
use tokio::time::Instant;

use crate::statsd::{SinkCounters, SinkTimers};
use crate::{
    Connector, HubConnection, HubMessage, HubTarget, HubTransport, RuntimeInfo, SinkConfig,
    SinkError, TransportError,
};

/// Message property naming the destination table.
const TABLE_PROPERTY: &str = "Table";
/// Message property naming the payload format.
const FORMAT_PROPERTY: &str = "Format";
/// Message property naming the ingestion mapping.
const MAPPING_PROPERTY: &str = "IngestionMappingReference";

/// How data points are submitted to the hub.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeliveryMode {
    /// All data points of a call in one submission.
    Batch,
    /// One submission per data point, with routing properties.
    Single,
}

impl DeliveryMode {
    /// Returns the name used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Batch => "batch",
            Self::Single => "single",
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of one [`Dispatcher::send`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DispatchOutcome {
    /// Data points accepted by the hub.
    pub delivered: usize,
    /// Data points that were encoded or submitted unsuccessfully.
    pub failed: usize,
    /// Wall time of the call.
    pub duration: Duration,
}

/// An error failing a whole [`Dispatcher::send`] call.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The hub rejected the submission.
    #[error("failed to submit to event hub")]
    Send(#[source] TransportError),
    /// The deadline of the call passed.
    #[error("dispatch cancelled by deadline")]
    Cancelled,
    /// The sink has been closed.
    #[error("sink is closed")]
    Closed,
}

impl From<TransportError> for DispatchError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Closed => Self::Closed,
            other => Self::Send(other),
        }
    }
}

/// Encodes data points and submits them over the owned [`HubConnection`].
///
/// The dispatcher can be shared between concurrent requests. It never retries.
pub struct Dispatcher {
    connection: ArcSwap<HubConnection>,
    connector: Arc<dyn Connector>,
    codec: Arc<dyn Codec>,
    mode: DeliveryMode,
    partition_key_label: Option<String>,
    ingestion_mapping: String,
    metrics: Arc<MetricsClient>,
    closed: AtomicBool,
}

impl Dispatcher {
    /// Connects to the hub described by `config` and creates a dispatcher owning the connection.
    ///
    /// `nan_value` replaces `NaN` sample values during encoding.
    pub async fn connect(
        config: &SinkConfig,
        nan_value: f64,
        connector: Arc<dyn Connector>,
        metrics: Arc<MetricsClient>,
    ) -> Result<Self, SinkError> {
        let codec = codec_from_name(&config.serializer, nan_value)?;
        let connection = HubConnection::connect(config, connector.as_ref()).await?;
        Ok(Self::new(config, codec, connection, connector, metrics))
    }

    /// Creates a dispatcher from an established connection.
    pub fn new(
        config: &SinkConfig,
        codec: Arc<dyn Codec>,
        connection: HubConnection,
        connector: Arc<dyn Connector>,
        metrics: Arc<MetricsClient>,
    ) -> Self {
        let mode = match config.batch {
            true => DeliveryMode::Batch,
            false => DeliveryMode::Single,
        };

        let partition_key_label = config
            .partition_key_label
            .as_deref()
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .map(str::to_owned);

        Self {
            connection: ArcSwap::from_pointee(connection),
            connector,
            codec,
            mode,
            partition_key_label,
            ingestion_mapping: config.ingestion_mapping.clone(),
            metrics,
            closed: AtomicBool::new(false),
        }
    }

    /// The delivery mode.
    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    /// The current destination hub.
    pub fn target(&self) -> HubTarget {
        self.connection.load().target().clone()
    }

    /// Runtime information of the current destination hub.
    pub fn runtime(&self) -> RuntimeInfo {
        self.connection.load().runtime().clone()
    }

    /// Returns `true` once [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Encodes and submits `points` in order.
    ///
    /// Points that fail to encode are skipped and counted as failed. In single mode, a point the
    /// hub rejects is skipped as well. The call returns [`DispatchError::Cancelled`] as soon as
    /// `deadline` passes.
    pub async fn send(
        &self,
        points: &[DataPoint],
        deadline: Instant,
    ) -> Result<DispatchOutcome, DispatchError> {
        if self.is_closed() {
            return Err(DispatchError::Closed);
        }

        let connection = self.connection.load_full();
        let start = Instant::now();

        let result = tokio::time::timeout_at(deadline, async {
            match self.mode {
                DeliveryMode::Batch => self.send_batch(connection.transport(), points).await,
                DeliveryMode::Single => self.send_single(connection.transport(), points).await,
            }
        })
        .await;

        let duration = start.elapsed();
        let remote = connection.target().to_string();
        metric!(
            self.metrics,
            timer(SinkTimers::BatchSendDuration) = duration,
            remote = &remote,
            mode = self.mode.as_str(),
        );

        // A reset may have replaced the connection while this call was using it.
        if !Arc::ptr_eq(&connection, &*self.connection.load()) {
            retire(connection).await;
        }

        let (delivered, failed) = result.unwrap_or(Err(DispatchError::Cancelled))?;

        metrelay_log::debug!(
            hub = %remote,
            mode = self.mode.as_str(),
            delivered,
            failed,
            duration = ?duration,
            "dispatched samples"
        );

        Ok(DispatchOutcome {
            delivered,
            failed,
            duration,
        })
    }

    async fn send_batch(
        &self,
        transport: &dyn HubTransport,
        points: &[DataPoint],
    ) -> Result<(usize, usize), DispatchError> {
        let mut messages = Vec::with_capacity(points.len());
        let mut failed = 0;

        for point in points {
            match self.message(point, false) {
                Some(message) => messages.push(message),
                None => failed += 1,
            }
        }

        if messages.is_empty() {
            return Ok((0, failed));
        }

        let delivered = messages.len();
        if let Err(error) = transport.send_batch(messages).await {
            metric!(
                self.metrics,
                counter(SinkCounters::SendFailed) += 1,
                mode = self.mode.as_str(),
            );
            metrelay_log::error!(
                samples = delivered,
                "failed to submit batch: {}",
                LogError(&error)
            );
            return Err(error.into());
        }

        Ok((delivered, failed))
    }

    async fn send_single(
        &self,
        transport: &dyn HubTransport,
        points: &[DataPoint],
    ) -> Result<(usize, usize), DispatchError> {
        let mut delivered = 0;
        let mut failed = 0;

        for (index, point) in points.iter().enumerate() {
            let Some(message) = self.message(point, true) else {
                failed += 1;
                continue;
            };

            match transport.send(message).await {
                Ok(()) => delivered += 1,
                Err(TransportError::Closed) => {
                    let remaining = points.len() - index;
                    metrelay_log::warn!(
                        samples = remaining,
                        "event hub connection closed during dispatch"
                    );
                    failed += remaining;
                    break;
                }
                Err(error) => {
                    failed += 1;
                    metric!(
                        self.metrics,
                        counter(SinkCounters::SendFailed) += 1,
                        mode = self.mode.as_str(),
                    );
                    metrelay_log::warn!(
                        sample_name = point.name(),
                        "failed to submit sample: {}",
                        LogError(&error)
                    );
                }
            }
        }

        Ok((delivered, failed))
    }

    /// Encodes one point. Returns `None` and records the failure if encoding fails.
    fn message(&self, point: &DataPoint, with_routing: bool) -> Option<HubMessage> {
        let body = match self.codec.encode(point) {
            Ok(body) => body,
            Err(error) => {
                metric!(
                    self.metrics,
                    counter(SinkCounters::EncodingFailed) += 1,
                    format = self.codec.name(),
                );
                metrelay_log::warn!(
                    sample_name = point.name(),
                    format = self.codec.name(),
                    "failed to encode sample: {}",
                    LogError(&error)
                );
                return None;
            }
        };

        let partition_key = self
            .partition_key_label
            .as_deref()
            .and_then(|label| point.label(label))
            .map(str::to_owned);

        let mut properties = BTreeMap::new();
        if with_routing {
            properties.insert(TABLE_PROPERTY.to_owned(), point.name().to_owned());
            properties.insert(
                FORMAT_PROPERTY.to_owned(),
                self.codec.data_format().as_str().to_owned(),
            );
            properties.insert(MAPPING_PROPERTY.to_owned(), self.ingestion_mapping.clone());
        }

        Some(HubMessage {
            body,
            partition_key,
            properties,
        })
    }

    /// Replaces the connection with a new one built from `config`.
    ///
    /// Delivery settings of the dispatcher stay unchanged. The previous connection is closed by
    /// whoever releases it last: this call, or the last in-flight [`send`](Self::send) still
    /// using it. On failure, the previous connection stays in place.
    ///
    /// Fails with [`SinkError::Closed`] after [`close`](Self::close).
    pub async fn reset_connection(&self, config: &SinkConfig) -> Result<(), SinkError> {
        if self.is_closed() {
            return Err(SinkError::Closed);
        }

        let connection = HubConnection::connect(config, self.connector.as_ref()).await?;

        if self.is_closed() {
            retire(Arc::new(connection)).await;
            return Err(SinkError::Closed);
        }

        let previous = self.connection.swap(Arc::new(connection));
        retire(previous).await;

        Ok(())
    }

    /// Closes the connection. Only the first call has an effect.
    pub async fn close(&self) -> Result<(), DispatchError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let connection = self.connection.load_full();
        match connection.close().await {
            Ok(()) | Err(TransportError::Closed) => {
                metrelay_log::info!(hub = %connection.target(), "closed event hub connection");
                Ok(())
            }
            Err(error) => Err(DispatchError::Send(error)),
        }
    }
}

/// Closes a replaced connection if the caller holds the last reference to it.
async fn retire(connection: Arc<HubConnection>) {
    let Some(connection) = Arc::into_inner(connection) else {
        return;
    };

    if let Err(error) = connection.close().await {
        metrelay_log::warn!(
            hub = %connection.target(),
            "failed to close previous connection: {}",
            LogError(&error)
        );
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("connection", &self.connection.load())
            .field("codec", &self.codec.name())
            .field("mode", &self.mode)
            .field("partition_key_label", &self.partition_key_label)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use metrelay_codec::JsonCodec;

    use super::*;
    use crate::testutils::{MockConnector, MockTransport};

    const CONNECTION_STRING: &str = "Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=send;SharedAccessKey=a2V5;EntityPath=metrics";

    fn config(batch: bool) -> SinkConfig {
        SinkConfig {
            connection_string: Some(CONNECTION_STRING.to_owned()),
            batch,
            partition_key_label: Some("instance".to_owned()),
            ..Default::default()
        }
    }

    fn point(name: &str, instance: &str, timestamp: i64) -> DataPoint {
        let labels = BTreeMap::from([
            ("__name__".to_owned(), name.to_owned()),
            ("instance".to_owned(), instance.to_owned()),
        ]);
        DataPoint::new(labels, 1.0, timestamp)
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(10)
    }

    async fn dispatcher(
        batch: bool,
        transport: Arc<MockTransport>,
    ) -> (Dispatcher, metrelay_statsd::MetricsCapture) {
        let (metrics, capture) = MetricsClient::capturing();
        let connector = Arc::new(MockConnector::new(transport));
        let dispatcher = Dispatcher::connect(&config(batch), 0.0, connector, Arc::new(metrics))
            .await
            .unwrap();
        (dispatcher, capture)
    }

    #[tokio::test]
    async fn test_batch_mode_single_call() {
        let transport = Arc::new(MockTransport::new());
        let (dispatcher, capture) = dispatcher(true, transport.clone()).await;

        let points = [point("up", "a", 1_000), point("down", "b", 2_000)];
        let outcome = dispatcher.send(&points, deadline()).await.unwrap();

        assert_eq!((outcome.delivered, outcome.failed), (2, 0));

        let batches = transport.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[0][0].partition_key.as_deref(), Some("a"));
        assert_eq!(batches[0][1].partition_key.as_deref(), Some("b"));
        assert!(batches[0][0].properties.is_empty());
        assert_eq!(transport.send_calls(), 0);

        let lines = capture.drain();
        assert!(lines.iter().any(|line| {
            line.starts_with("batch_send.duration:")
                && line.ends_with("|#remote:ns.servicebus.windows.net/metrics,mode:batch")
        }));
    }

    #[tokio::test]
    async fn test_batch_mode_skips_unencodable() {
        let transport = Arc::new(MockTransport::new());
        let (dispatcher, capture) = dispatcher(true, transport.clone()).await;

        let points = [
            point("up", "a", 1_000),
            point("up", "b", i64::MAX),
            point("up", "c", 3_000),
        ];
        let outcome = dispatcher.send(&points, deadline()).await.unwrap();

        assert_eq!((outcome.delivered, outcome.failed), (2, 1));
        assert_eq!(transport.batches()[0].len(), 2);
        assert!(
            capture
                .drain()
                .contains(&"samples.encoding_failed:1|c|#format:json".to_owned())
        );
    }

    #[tokio::test]
    async fn test_batch_mode_failure_fails_call() {
        let transport = Arc::new(MockTransport::new().fail_batches());
        let (dispatcher, capture) = dispatcher(true, transport).await;

        let result = dispatcher.send(&[point("up", "a", 1_000)], deadline()).await;
        assert!(matches!(result, Err(DispatchError::Send(_))));
        assert!(
            capture
                .drain()
                .contains(&"sink.send_failed:1|c|#mode:batch".to_owned())
        );
    }

    #[tokio::test]
    async fn test_single_mode_unencodable_point() {
        let transport = Arc::new(MockTransport::new());
        let (dispatcher, _capture) = dispatcher(false, transport.clone()).await;

        let points = [
            point("up", "a", 1_000),
            point("up", "b", i64::MAX),
            point("down", "c", 3_000),
        ];
        let outcome = dispatcher.send(&points, deadline()).await.unwrap();

        assert_eq!(outcome.delivered, 2);
        assert_eq!(outcome.failed, 1);
        assert_eq!(transport.send_calls(), 2);
        assert!(transport.batches().is_empty());

        let messages = transport.messages();
        assert_eq!(messages[0].partition_key.as_deref(), Some("a"));
        assert_eq!(messages[1].partition_key.as_deref(), Some("c"));
        assert_eq!(messages[1].properties["Table"], "down");
        assert_eq!(messages[1].properties["Format"], "json");
        assert_eq!(messages[1].properties["IngestionMappingReference"], "promMap");
    }

    #[tokio::test]
    async fn test_single_mode_continues_after_rejection() {
        let transport = Arc::new(MockTransport::new().fail_send(0));
        let (dispatcher, capture) = dispatcher(false, transport.clone()).await;

        let points = [point("up", "a", 1_000), point("up", "b", 2_000)];
        let outcome = dispatcher.send(&points, deadline()).await.unwrap();

        assert_eq!((outcome.delivered, outcome.failed), (1, 1));
        assert_eq!(transport.send_calls(), 2);
        assert!(
            capture
                .drain()
                .contains(&"sink.send_failed:1|c|#mode:single".to_owned())
        );
    }

    #[tokio::test]
    async fn test_partition_key_missing_label() {
        let transport = Arc::new(MockTransport::new());
        let (dispatcher, _capture) = dispatcher(true, transport.clone()).await;

        let point = DataPoint::new(BTreeMap::new(), 1.0, 1_000);
        dispatcher.send(&[point], deadline()).await.unwrap();
        assert_eq!(transport.batches()[0][0].partition_key, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels() {
        let transport = Arc::new(MockTransport::new().with_delay(Duration::from_secs(5)));
        let (dispatcher, _capture) = dispatcher(true, transport).await;

        let deadline = Instant::now() + Duration::from_secs(1);
        let result = dispatcher.send(&[point("up", "a", 1_000)], deadline).await;
        assert!(matches!(result, Err(DispatchError::Cancelled)));
    }

    #[tokio::test]
    async fn test_close_once() {
        let transport = Arc::new(MockTransport::new());
        let (dispatcher, _capture) = dispatcher(true, transport.clone()).await;

        dispatcher.close().await.unwrap();
        dispatcher.close().await.unwrap();

        assert_eq!(transport.close_calls(), 1);
        assert!(dispatcher.is_closed());
        assert!(matches!(
            dispatcher.send(&[point("up", "a", 1_000)], deadline()).await,
            Err(DispatchError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_reset_connection() {
        let first = Arc::new(MockTransport::new());
        let second = Arc::new(MockTransport::new());
        let connector = Arc::new(MockConnector::new(first.clone()).then(second.clone()));

        let dispatcher = Dispatcher::connect(
            &config(true),
            0.0,
            connector.clone(),
            Arc::new(MetricsClient::noop()),
        )
        .await
        .unwrap();

        dispatcher.reset_connection(&config(true)).await.unwrap();
        assert_eq!(connector.connects(), 2);
        assert_eq!(first.close_calls(), 1);

        dispatcher
            .send(&[point("up", "a", 1_000)], deadline())
            .await
            .unwrap();
        assert!(first.batches().is_empty());
        assert_eq!(second.batches().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_during_send() {
        let first = Arc::new(MockTransport::new().with_delay(Duration::from_secs(1)));
        let second = Arc::new(MockTransport::new());
        let connector = Arc::new(MockConnector::new(first.clone()).then(second.clone()));

        let dispatcher = Dispatcher::connect(
            &config(false),
            0.0,
            connector,
            Arc::new(MetricsClient::noop()),
        )
        .await
        .unwrap();
        let dispatcher = Arc::new(dispatcher);

        let sending = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move {
                let points = [point("up", "a", 1_000), point("up", "b", 2_000)];
                dispatcher.send(&points, deadline()).await
            }
        });

        // The first message is still in flight.
        tokio::time::sleep(Duration::from_millis(500)).await;
        dispatcher.reset_connection(&config(false)).await.unwrap();
        assert_eq!(first.close_calls(), 0);

        let outcome = sending.await.unwrap().unwrap();
        assert_eq!((outcome.delivered, outcome.failed), (2, 0));
        assert_eq!(first.messages().len(), 2);
        assert!(second.messages().is_empty());

        // The last user of the replaced connection closes it.
        assert_eq!(first.close_calls(), 1);
        assert_eq!(second.close_calls(), 0);
    }

    #[tokio::test]
    async fn test_reset_after_close() {
        let first = Arc::new(MockTransport::new());
        let second = Arc::new(MockTransport::new());
        let connector = Arc::new(MockConnector::new(first.clone()).then(second.clone()));

        let dispatcher = Dispatcher::connect(
            &config(true),
            0.0,
            connector.clone(),
            Arc::new(MetricsClient::noop()),
        )
        .await
        .unwrap();

        dispatcher.close().await.unwrap();
        let result = dispatcher.reset_connection(&config(true)).await;

        assert!(matches!(result, Err(SinkError::Closed)));
        assert_eq!(connector.connects(), 1);
        assert_eq!(second.runtime_calls(), 0);
    }

    #[tokio::test]
    async fn test_single_mode_closed_transport_counts_remaining() {
        let transport = Arc::new(MockTransport::new());
        let (dispatcher, _capture) = dispatcher(false, transport.clone()).await;

        let points = [
            point("up", "a", 1_000),
            point("up", "b", 2_000),
            point("up", "c", 3_000),
        ];
        transport.close().await.unwrap();
        let outcome = dispatcher.send(&points, deadline()).await.unwrap();

        assert_eq!((outcome.delivered, outcome.failed), (0, 3));
        assert_eq!(transport.send_calls(), 1);
    }

    #[tokio::test]
    async fn test_reset_connection_failure_keeps_previous() {
        let transport = Arc::new(MockTransport::new());
        let (dispatcher, _capture) = dispatcher(true, transport.clone()).await;

        let result = dispatcher.reset_connection(&SinkConfig::default()).await;
        assert!(matches!(result, Err(SinkError::Configuration)));
        assert_eq!(transport.close_calls(), 0);
        assert_eq!(dispatcher.target().hub, "metrics");
    }

    #[tokio::test]
    async fn test_blank_partition_label_ignored() {
        let transport = Arc::new(MockTransport::new());
        let connector = Arc::new(MockConnector::new(transport));
        let connection = HubConnection::connect(&config(true), connector.as_ref())
            .await
            .unwrap();

        let config = SinkConfig {
            partition_key_label: Some("  ".to_owned()),
            ..config(true)
        };
        let dispatcher = Dispatcher::new(
            &config,
            Arc::new(JsonCodec::new(0.0)),
            connection,
            connector,
            Arc::new(MetricsClient::noop()),
        );
        assert_eq!(dispatcher.partition_key_label, None);
        assert_eq!(dispatcher.mode(), DeliveryMode::Batch);
    }
}
