use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use metrelay_config::Config;
use metrelay_eventhub::{DispatchError, Dispatcher};
use metrelay_filter::SampleFilter;
use metrelay_log::LogError;
use metrelay_protocol::{DataPoint, DecodeError, DecodeOptions, decode_write_request};
use metrelay_statsd::{MetricsClient, metric};
use tokio::time::Instant;

use crate::statsd::{ServerCounters, ServerGauges};
use crate::throughput::ThroughputMonitor;

/// Counts of one handled write request.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RequestOutcome {
    /// Samples decoded from the body.
    pub received: usize,
    /// Samples dropped by the filter.
    pub filtered: usize,
    /// Samples accepted by the event hub.
    pub delivered: usize,
    /// Samples that could not be encoded or delivered.
    pub failed: usize,
}

impl RequestOutcome {
    /// Samples passed to the event hub sink.
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }
}

/// An error handling a write request.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// The body is not a valid remote-write request.
    #[error("invalid write request")]
    Decode(#[from] DecodeError),
    /// Delivery did not finish before the request deadline.
    #[error("request deadline exceeded")]
    Cancelled,
    /// Delivery to the event hub failed.
    #[error("failed to deliver samples")]
    Dispatch(#[source] DispatchError),
    /// Some samples of the request could not be delivered.
    #[error("failed to deliver {} of {} samples", .0.failed, .0.attempted())]
    Partial(RequestOutcome),
}

impl RequestError {
    fn reason(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::Cancelled => "cancelled",
            Self::Dispatch(_) => "dispatch",
            Self::Partial(_) => "partial",
        }
    }

    /// The HTTP status reported for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Decode(DecodeError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Decode(_) => StatusCode::BAD_REQUEST,
            Self::Cancelled => StatusCode::REQUEST_TIMEOUT,
            Self::Dispatch(_) | Self::Partial(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DispatchError> for RequestError {
    fn from(error: DispatchError) -> Self {
        match error {
            DispatchError::Cancelled => Self::Cancelled,
            other => Self::Dispatch(other),
        }
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

/// Decodes, filters and dispatches write requests.
#[derive(Debug)]
pub struct Pipeline {
    filter: SampleFilter,
    options: DecodeOptions,
    dispatcher: Arc<Dispatcher>,
    throughput: Arc<ThroughputMonitor>,
    metrics: Arc<MetricsClient>,
    sent: AtomicU64,
}

impl Pipeline {
    /// Creates the pipeline for `config`, delivering through `dispatcher`.
    pub fn new(
        config: &Config,
        dispatcher: Arc<Dispatcher>,
        throughput: Arc<ThroughputMonitor>,
        metrics: Arc<MetricsClient>,
    ) -> Self {
        Self {
            filter: SampleFilter::new(config.filter()),
            options: DecodeOptions {
                nan_value: config.nan_value(),
                max_decoded_size: config.max_decoded_size(),
            },
            dispatcher,
            throughput,
            metrics,
            sent: AtomicU64::new(0),
        }
    }

    /// Total number of samples delivered since startup.
    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Handles one compressed remote-write body.
    ///
    /// Delivery is aborted with [`RequestError::Cancelled`] once `deadline` passes.
    pub async fn handle(
        &self,
        body: &[u8],
        deadline: Instant,
    ) -> Result<RequestOutcome, RequestError> {
        let result = self.process(body, deadline).await;

        if let Err(ref error) = result {
            metric!(
                self.metrics,
                counter(ServerCounters::RequestsRejected) += 1,
                reason = error.reason(),
            );
        }

        self.report_throughput();
        result
    }

    async fn process(
        &self,
        body: &[u8],
        deadline: Instant,
    ) -> Result<RequestOutcome, RequestError> {
        let batch = decode_write_request(body, self.options).inspect_err(|error| {
            metrelay_log::debug!("rejected write request: {}", LogError(error));
        })?;

        let received = batch.len();
        metric!(
            self.metrics,
            counter(ServerCounters::SamplesReceived) += received as i64
        );

        let points: Vec<DataPoint> = batch
            .into_iter()
            .filter(|point| self.keep(point))
            .collect();

        let mut outcome = RequestOutcome {
            received,
            filtered: received - points.len(),
            ..Default::default()
        };

        if points.is_empty() {
            return Ok(outcome);
        }

        let remote = self.dispatcher.target().to_string();
        let dispatched = match self.dispatcher.send(&points, deadline).await {
            Ok(dispatched) => dispatched,
            Err(error) => {
                metric!(
                    self.metrics,
                    counter(ServerCounters::SamplesFailed) += points.len() as i64,
                    remote = &remote,
                );
                metrelay_log::error!(
                    samples = points.len(),
                    hub = %remote,
                    "failed to dispatch samples: {}",
                    LogError(&error)
                );
                return Err(error.into());
            }
        };

        outcome.delivered = dispatched.delivered;
        outcome.failed = dispatched.failed;

        metric!(
            self.metrics,
            counter(ServerCounters::SamplesSent) += dispatched.delivered as i64,
            remote = &remote,
        );
        metric!(
            self.metrics,
            counter(ServerCounters::SamplesFailed) += dispatched.failed as i64,
            remote = &remote,
        );

        let delivered = dispatched.delivered as u64;
        let total = self.sent.fetch_add(delivered, Ordering::Relaxed) + delivered;
        self.throughput.publish(total);

        if outcome.failed > 0 {
            return Err(RequestError::Partial(outcome));
        }

        Ok(outcome)
    }

    fn keep(&self, point: &DataPoint) -> bool {
        match self.filter.should_filter(point) {
            Ok(()) => true,
            Err(key) => {
                metric!(
                    self.metrics,
                    counter(ServerCounters::SamplesFiltered) += 1,
                    reason = key.name(),
                );
                false
            }
        }
    }

    fn report_throughput(&self) {
        if let Some(rate) = self.throughput.try_rate() {
            metrelay_log::info!(rate, sent = self.sent(), "sample throughput");
            metric!(self.metrics, gauge(ServerGauges::Throughput) = rate);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use metrelay_eventhub::testutils::MockTransport;

    use super::*;
    use crate::testutils::{self, series};

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(10)
    }

    #[tokio::test]
    async fn test_handle_delivers_in_order() {
        let setup = testutils::setup("", MockTransport::new()).await;
        let body = testutils::write_request(vec![
            series("up", &[("instance", "a")], &[(1.0, 1_000), (2.0, 2_000)]),
            series("down", &[("instance", "b")], &[(3.0, 3_000)]),
        ]);

        let outcome = setup.pipeline.handle(&body, deadline()).await.unwrap();
        assert_eq!(
            outcome,
            RequestOutcome {
                received: 3,
                filtered: 0,
                delivered: 3,
                failed: 0,
            }
        );

        let batches = setup.transport.batches();
        assert_eq!(batches.len(), 1);
        let bodies: Vec<_> = batches[0]
            .iter()
            .map(|m| String::from_utf8(m.body.clone()).unwrap())
            .collect();
        insta::assert_debug_snapshot!(bodies, @r#"
        [
            "{\"timestamp\":\"1970-01-01T00:00:01Z\",\"value\":1.0,\"name\":\"up\",\"labels\":{\"instance\":\"a\"}}",
            "{\"timestamp\":\"1970-01-01T00:00:02Z\",\"value\":2.0,\"name\":\"up\",\"labels\":{\"instance\":\"a\"}}",
            "{\"timestamp\":\"1970-01-01T00:00:03Z\",\"value\":3.0,\"name\":\"down\",\"labels\":{\"instance\":\"b\"}}",
        ]
        "#);

        assert_eq!(setup.pipeline.sent(), 3);
        let lines = setup.capture.drain();
        assert!(lines.contains(&"samples.received:3|c".to_owned()));
        assert!(
            lines.contains(&"samples.sent:3|c|#remote:ns.servicebus.windows.net/metrics".to_owned())
        );
    }

    #[tokio::test]
    async fn test_handle_filters() {
        let setup = testutils::setup(
            "filter:\n  mode: deny\n  names: [DOWN]\n",
            MockTransport::new(),
        )
        .await;
        let body = testutils::write_request(vec![
            series("up", &[], &[(1.0, 1_000)]),
            series("down", &[], &[(1.0, 1_000)]),
        ]);

        let outcome = setup.pipeline.handle(&body, deadline()).await.unwrap();
        assert_eq!((outcome.filtered, outcome.delivered), (1, 1));
        assert!(
            setup
                .capture
                .drain()
                .contains(&"samples.filtered:1|c|#reason:denied".to_owned())
        );
    }

    #[tokio::test]
    async fn test_handle_all_filtered_skips_dispatch() {
        let setup = testutils::setup(
            "filter:\n  mode: allow\n  names: [up]\n",
            MockTransport::new(),
        )
        .await;
        let body = testutils::write_request(vec![series("down", &[], &[(1.0, 1_000)])]);

        let outcome = setup.pipeline.handle(&body, deadline()).await.unwrap();
        assert_eq!(outcome.filtered, 1);
        assert!(setup.transport.batches().is_empty());
    }

    #[tokio::test]
    async fn test_handle_invalid_body() {
        let setup = testutils::setup("", MockTransport::new()).await;

        let error = setup
            .pipeline
            .handle(b"not snappy", deadline())
            .await
            .unwrap_err();
        assert!(matches!(error, RequestError::Decode(_)));
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert!(
            setup
                .capture
                .drain()
                .contains(&"requests.rejected:1|c|#reason:decode".to_owned())
        );
    }

    #[tokio::test]
    async fn test_handle_decoded_size_limit() {
        let setup =
            testutils::setup("pipeline:\n  max_decoded_size: 16\n", MockTransport::new()).await;
        let body = testutils::write_request(vec![series("up", &[], &[(1.0, 1_000)])]);

        let error = setup.pipeline.handle(&body, deadline()).await.unwrap_err();
        assert!(matches!(error, RequestError::Decode(DecodeError::TooLarge { limit: 16, .. })));
        assert_eq!(error.status_code(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(setup.transport.batches().is_empty());
    }

    #[tokio::test]
    async fn test_handle_partial_failure() {
        let setup = testutils::setup("", MockTransport::new()).await;
        let body = testutils::write_request(vec![series(
            "up",
            &[],
            &[(1.0, 1_000), (2.0, i64::MAX)],
        )]);

        let error = setup.pipeline.handle(&body, deadline()).await.unwrap_err();
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.to_string(), "failed to deliver 1 of 2 samples");
        assert_eq!(setup.pipeline.sent(), 1);
    }

    #[tokio::test]
    async fn test_handle_dispatch_failure() {
        let setup = testutils::setup("", MockTransport::new().fail_batches()).await;
        let body = testutils::write_request(vec![series("up", &[], &[(1.0, 1_000)])]);

        let error = setup.pipeline.handle(&body, deadline()).await.unwrap_err();
        assert!(matches!(error, RequestError::Dispatch(_)));
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(
            setup.capture.drain().contains(
                &"samples.failed:1|c|#remote:ns.servicebus.windows.net/metrics".to_owned()
            )
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_reports_throughput() {
        let setup = testutils::setup("", MockTransport::new()).await;
        assert!(setup.pipeline.throughput.start());

        let is_throughput = |line: &String| line.starts_with("samples.throughput:");

        let body =
            testutils::write_request(vec![series("up", &[], &[(1.0, 1_000), (2.0, 2_000)])]);
        setup.pipeline.handle(&body, deadline()).await.unwrap();
        assert!(!setup.capture.drain().iter().any(is_throughput));

        // The first tick only records the baseline.
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let body = testutils::write_request(vec![series(
            "up",
            &[],
            &[(1.0, 3_000), (2.0, 4_000), (3.0, 5_000)],
        )]);
        setup.pipeline.handle(&body, deadline()).await.unwrap();
        assert!(!setup.capture.drain().iter().any(is_throughput));

        tokio::time::sleep(Duration::from_secs(1)).await;
        let body = testutils::write_request(vec![series("up", &[], &[(1.0, 6_000)])]);
        setup.pipeline.handle(&body, deadline()).await.unwrap();

        let lines = setup.capture.drain();
        let reported: Vec<_> = lines.iter().filter(|line| is_throughput(*line)).collect();
        assert_eq!(reported, ["samples.throughput:3|g"]);
        assert_eq!(setup.pipeline.sent(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_deadline() {
        let transport = MockTransport::new().with_delay(Duration::from_secs(5));
        let setup = testutils::setup("", transport).await;
        let body = testutils::write_request(vec![series("up", &[], &[(1.0, 1_000)])]);

        let deadline = Instant::now() + Duration::from_secs(1);
        let error = setup.pipeline.handle(&body, deadline).await.unwrap_err();
        assert!(matches!(error, RequestError::Cancelled));
        assert_eq!(error.status_code(), StatusCode::REQUEST_TIMEOUT);
    }
}
