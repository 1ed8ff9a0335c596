use metrelay_statsd::{CounterMetric, TimerMetric};

/// Counter metrics of the event hub sink.
pub enum SinkCounters {
    /// Number of data points that could not be encoded.
    ///
    /// This metric is tagged with:
    ///  - `format`: The name of the codec.
    EncodingFailed,
    /// Number of failed calls to the event hub.
    ///
    /// This metric is tagged with:
    ///  - `mode`: `batch` or `single`.
    SendFailed,
}

impl CounterMetric for SinkCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::EncodingFailed => "samples.encoding_failed",
            Self::SendFailed => "sink.send_failed",
        }
    }
}

/// Timer metrics of the event hub sink.
pub enum SinkTimers {
    /// Wall time of one dispatch call, including encoding.
    ///
    /// This metric is tagged with:
    ///  - `remote`: The destination hub.
    ///  - `mode`: `batch` or `single`.
    BatchSendDuration,
}

impl TimerMetric for SinkTimers {
    fn name(&self) -> &'static str {
        match self {
            Self::BatchSendDuration => "batch_send.duration",
        }
    }
}
