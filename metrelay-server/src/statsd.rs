use metrelay_statsd::{CounterMetric, GaugeMetric, TimerMetric};

/// Gauge metrics used by the server.
pub enum ServerGauges {
    /// Delivered samples per second, as last published by the throughput monitor.
    Throughput,
    /// Always `1`, tagged with the running version.
    ///
    /// This metric is tagged with:
    ///  - `version`: The version of metrelay.
    AdapterInfo,
}

impl GaugeMetric for ServerGauges {
    fn name(&self) -> &'static str {
        match self {
            ServerGauges::Throughput => "samples.throughput",
            ServerGauges::AdapterInfo => "adapter.info",
        }
    }
}

/// Timer metrics used by the server.
pub enum ServerTimers {
    /// Total time spent handling a request.
    ///
    /// This metric is tagged with:
    ///  - `route`: The matched route.
    ///  - `method`: The HTTP method.
    ///  - `status_code`: The HTTP status of the response.
    RequestsDuration,
}

impl TimerMetric for ServerTimers {
    fn name(&self) -> &'static str {
        match self {
            ServerTimers::RequestsDuration => "requests.duration",
        }
    }
}

/// Counter metrics used by the server.
pub enum ServerCounters {
    /// Number of handled requests.
    ///
    /// This metric is tagged with:
    ///  - `route`: The matched route.
    ///  - `method`: The HTTP method.
    ///  - `status_code`: The HTTP status of the response.
    Requests,
    /// Number of write requests that did not complete successfully.
    ///
    /// This metric is tagged with:
    ///  - `reason`: `decode`, `cancelled`, `dispatch` or `partial`.
    RequestsRejected,
    /// Number of samples decoded from write requests.
    SamplesReceived,
    /// Number of samples dropped by the sample filter.
    ///
    /// This metric is tagged with:
    ///  - `reason`: `not-allowed` or `denied`.
    SamplesFiltered,
    /// Number of samples accepted by the event hub.
    ///
    /// This metric is tagged with:
    ///  - `remote`: The destination hub.
    SamplesSent,
    /// Number of samples that could not be delivered.
    ///
    /// This metric is tagged with:
    ///  - `remote`: The destination hub.
    SamplesFailed,
    /// Incremented once when the server starts.
    ServerStarting,
}

impl CounterMetric for ServerCounters {
    fn name(&self) -> &'static str {
        match self {
            ServerCounters::Requests => "requests",
            ServerCounters::RequestsRejected => "requests.rejected",
            ServerCounters::SamplesReceived => "samples.received",
            ServerCounters::SamplesFiltered => "samples.filtered",
            ServerCounters::SamplesSent => "samples.sent",
            ServerCounters::SamplesFailed => "samples.failed",
            ServerCounters::ServerStarting => "server.starting",
        }
    }
}
