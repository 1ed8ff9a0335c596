use std::sync::Arc;

use metrelay_config::Config;
use metrelay_eventhub::Dispatcher;
use metrelay_eventhub::testutils::{MockConnector, MockTransport};
use metrelay_protocol::{Label, Sample, TimeSeries, WriteRequest, encode_write_request};
use metrelay_statsd::{MetricsCapture, MetricsClient};

use crate::pipeline::Pipeline;
use crate::service::ServiceState;
use crate::throughput::ThroughputMonitor;

const SINK: &str = "sink:\n  connection_string: \"Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=send;SharedAccessKey=a2V5;EntityPath=metrics\"\n";

pub struct Setup {
    pub state: ServiceState,
    pub pipeline: Arc<Pipeline>,
    pub transport: Arc<MockTransport>,
    pub capture: MetricsCapture,
}

/// Builds the service around a mock transport. `yaml` is appended to a sink configuration.
pub async fn setup(yaml: &str, transport: MockTransport) -> Setup {
    metrelay_log::init_test!();

    let config = Arc::new(Config::from_yaml_str(&format!("{SINK}{yaml}")).unwrap());
    let transport = Arc::new(transport);
    let (metrics, capture) = MetricsClient::capturing();
    let metrics = Arc::new(metrics);

    let dispatcher = Dispatcher::connect(
        config.sink(),
        config.nan_value(),
        Arc::new(MockConnector::new(transport.clone())),
        metrics.clone(),
    )
    .await
    .unwrap();
    let dispatcher = Arc::new(dispatcher);

    let throughput = Arc::new(ThroughputMonitor::new(config.throughput_interval()));
    let pipeline = Arc::new(Pipeline::new(
        &config,
        dispatcher.clone(),
        throughput,
        metrics.clone(),
    ));
    let state = ServiceState::new(config, pipeline.clone(), dispatcher, metrics);

    Setup {
        state,
        pipeline,
        transport,
        capture,
    }
}

pub fn series(name: &str, labels: &[(&str, &str)], samples: &[(f64, i64)]) -> TimeSeries {
    let mut all = vec![Label::new("__name__", name)];
    all.extend(labels.iter().map(|(k, v)| Label::new(*k, *v)));

    TimeSeries {
        labels: all,
        samples: samples
            .iter()
            .map(|&(value, timestamp)| Sample { value, timestamp })
            .collect(),
    }
}

pub fn write_request(timeseries: Vec<TimeSeries>) -> Vec<u8> {
    encode_write_request(&WriteRequest { timeseries }).unwrap()
}
