//! A high-level StatsD metric client built on cadence.
//!
//! ## Defining Metrics
//!
//! In order to use metrics, one needs to first define one of the metric traits on a custom enum.
//! The following types of metrics are available: `counter`, `timer`, `gauge` and `distribution`.
//! For explanations on what that means see [Metric Types].
//!
//! The metric traits serve only to provide a type safe metric name. All metric types have exactly
//! the same form, they are different only to ensure that a metric can only be used for the type for
//! which it was defined, (e.g. a counter metric cannot be used as a timer metric). See the traits
//! for more detailed examples.
//!
//! ## Creating the Client
//!
//! There is no process-wide client. A [`MetricsClient`] is created once during startup and shared
//! with every component that records metrics, usually behind an `Arc`:
//!
//! ```no_run
//! # use std::collections::BTreeMap;
//! use metrelay_statsd::{MetricsClient, MetricsClientConfig};
//!
//! let client = MetricsClient::from_config(MetricsClientConfig {
//!     prefix: "myprefix",
//!     host: "localhost:8125",
//!     default_tags: BTreeMap::new(),
//!     aggregate: true,
//! })
//! .unwrap();
//! ```
//!
//! If no StatsD upstream is configured, [`MetricsClient::noop`] discards everything.
//!
//! ## Macro Usage
//!
//! The recommended way to record metrics is by using the [`metric!`] macro. Its first argument is
//! the client. See the trait docs for more information on how to record each type of metric.
//!
//! ```
//! use metrelay_statsd::{metric, CounterMetric, MetricsClient};
//!
//! struct MyCounter;
//!
//! impl CounterMetric for MyCounter {
//!     fn name(&self) -> &'static str {
//!         "counter"
//!     }
//! }
//!
//! let client = MetricsClient::noop();
//! metric!(client, counter(MyCounter) += 1);
//! ```
//!
//! ## Manual Usage
//!
//! ```
//! use metrelay_statsd::prelude::*;
//!
//! let client = metrelay_statsd::MetricsClient::noop();
//! client.count("mymetric", 1).ok();
//! ```
//!
//! [Metric Types]: https://github.com/statsd/statsd/blob/master/docs/metric_types.md

use std::collections::BTreeMap;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::ops::Deref;
use std::time::Duration;

use cadence::{
    Metric, MetricBuilder, NopMetricSink, QueuingMetricSink, SpyMetricSink, StatsdClient,
    UdpMetricSink,
};
use statsdproxy::cadence::StatsdProxyMetricSink;
use statsdproxy::config::AggregateMetricsConfig;
use statsdproxy::middleware::aggregate::AggregateMetrics;
use statsdproxy::middleware::upstream::Upstream;

/// Maximum number of metric events that can be queued before we start dropping them.
const METRICS_MAX_QUEUE_SIZE: usize = 100_000;

/// Interval at which aggregated metrics are flushed upstream.
const AGGREGATE_FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// An error creating a [`MetricsClient`].
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The StatsD host could not be resolved.
    #[error("could not resolve statsd host")]
    Resolve(#[source] std::io::Error),
    /// The StatsD host resolved to no addresses.
    #[error("statsd host resolved to no addresses")]
    NoAddress,
    /// The local UDP socket could not be bound.
    #[error("could not bind statsd socket")]
    Socket(#[source] std::io::Error),
    /// The UDP sink could not be created.
    #[error("could not create statsd sink")]
    Sink(#[source] cadence::MetricError),
    /// The aggregating upstream could not be created.
    #[error("could not create statsd upstream: {0}")]
    Upstream(String),
}

/// Client configuration used for initialization of [`MetricsClient`].
#[derive(Debug)]
pub struct MetricsClientConfig<'a, A> {
    /// Prefix which is prepended to all metric names.
    pub prefix: &'a str,
    /// Host of the metrics upstream.
    pub host: A,
    /// Tags that are added to all metrics.
    pub default_tags: BTreeMap<String, String>,
    /// If metrics should be batched or sent immediately upstream.
    pub aggregate: bool,
}

/// A StatsD client with default tags.
///
/// Components receive a shared handle to the client at construction and record metrics through
/// the [`metric!`] macro.
pub struct MetricsClient {
    statsd_client: StatsdClient,
    default_tags: BTreeMap<String, String>,
}

impl fmt::Debug for MetricsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsClient")
            .field("default_tags", &self.default_tags)
            .finish_non_exhaustive()
    }
}

impl Deref for MetricsClient {
    type Target = StatsdClient;

    fn deref(&self) -> &StatsdClient {
        &self.statsd_client
    }
}

impl MetricsClient {
    /// Creates a client that reports to a StatsD upstream.
    pub fn from_config<A: ToSocketAddrs>(
        config: MetricsClientConfig<'_, A>,
    ) -> Result<Self, MetricsError> {
        let addr = resolve(&config.host)?;
        metrelay_log::info!("reporting metrics to statsd at {addr}");

        let statsd_client = if config.aggregate {
            // The factory runs on the sink's background thread and cannot report errors, so the
            // upstream is created once here to surface them.
            Upstream::new(addr).map_err(|error| MetricsError::Upstream(error.to_string()))?;

            let sink = StatsdProxyMetricSink::new(move || {
                let upstream = Upstream::new(addr).expect("statsd upstream checked at startup");

                AggregateMetrics::new(
                    AggregateMetricsConfig {
                        aggregate_gauges: true,
                        aggregate_counters: true,
                        flush_interval: AGGREGATE_FLUSH_INTERVAL,
                        flush_offset: 0,
                        max_map_size: None,
                    },
                    upstream,
                )
            });

            StatsdClient::from_sink(config.prefix, sink)
        } else {
            let socket = std::net::UdpSocket::bind("0.0.0.0:0").map_err(MetricsError::Socket)?;
            socket.set_nonblocking(true).map_err(MetricsError::Socket)?;

            let udp = UdpMetricSink::from(addr, socket).map_err(MetricsError::Sink)?;
            let sink = QueuingMetricSink::with_capacity(udp, METRICS_MAX_QUEUE_SIZE);
            StatsdClient::from_sink(config.prefix, sink)
        };

        Ok(Self {
            statsd_client,
            default_tags: config.default_tags,
        })
    }

    /// Creates a client that discards all metrics.
    pub fn noop() -> Self {
        Self {
            statsd_client: StatsdClient::from_sink("", NopMetricSink),
            default_tags: BTreeMap::new(),
        }
    }

    /// Creates a client that captures rendered metrics for inspection in tests.
    pub fn capturing() -> (Self, MetricsCapture) {
        let (rx, sink) = SpyMetricSink::new();
        let client = Self {
            statsd_client: StatsdClient::from_sink("", sink),
            default_tags: BTreeMap::new(),
        };
        (client, MetricsCapture(rx))
    }

    /// Adds default tags to every metric sent by this client.
    pub fn with_default_tags(mut self, tags: BTreeMap<String, String>) -> Self {
        self.default_tags.extend(tags);
        self
    }

    /// Send a metric with the default tags defined on this `MetricsClient`.
    #[inline(always)]
    pub fn send_metric<'a, T>(&'a self, mut metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        for (k, v) in &self.default_tags {
            metric = metric.with_tag(k, v);
        }

        if let Err(error) = metric.try_send() {
            metrelay_log::error!(
                error = &error as &dyn std::error::Error,
                maximum_capacity = METRICS_MAX_QUEUE_SIZE,
                "error sending a metric",
            );
        }
    }
}

fn resolve<A: ToSocketAddrs>(host: &A) -> Result<SocketAddr, MetricsError> {
    host.to_socket_addrs()
        .map_err(MetricsError::Resolve)?
        .next()
        .ok_or(MetricsError::NoAddress)
}

/// Receives metrics rendered by a client created with [`MetricsClient::capturing`].
#[derive(Debug)]
pub struct MetricsCapture(crossbeam_channel::Receiver<Vec<u8>>);

impl MetricsCapture {
    /// Returns all metric lines emitted since the last call.
    pub fn drain(&self) -> Vec<String> {
        self.0
            .try_iter()
            .map(|line| String::from_utf8_lossy(&line).into_owned())
            .collect()
    }
}

/// Internal prelude for the macro
#[doc(hidden)]
pub mod _pred {
    pub use cadence::prelude::*;
}

/// The metrics prelude that is necessary to use the client.
pub mod prelude {
    pub use cadence::prelude::*;
}

/// A metric for capturing timings.
///
/// Timings are a positive number of milliseconds between a start and end time. Examples include
/// time taken to render a web page or time taken for a database call to return.
///
/// ## Example
///
/// ```
/// use metrelay_statsd::{metric, MetricsClient, TimerMetric};
///
/// enum MyTimer {
///     ProcessA,
///     ProcessB,
/// }
///
/// impl TimerMetric for MyTimer {
///     fn name(&self) -> &'static str {
///         match self {
///             Self::ProcessA => "process_a",
///             Self::ProcessB => "process_b",
///         }
///     }
/// }
///
/// # fn process_a() {}
/// let client = MetricsClient::noop();
///
/// // measure time by explicitly setting a std::timer::Duration
/// # use std::time::Instant;
/// let start_time = Instant::now();
/// process_a();
/// metric!(client, timer(MyTimer::ProcessA) = start_time.elapsed());
///
/// // provide tags to a timer
/// metric!(
///     client,
///     timer(MyTimer::ProcessA) = start_time.elapsed(),
///     server = "server1",
/// );
///
/// // measure time implicitly by enclosing a code block in a metric
/// metric!(client, timer(MyTimer::ProcessB), {
///     process_a();
/// });
/// ```
pub trait TimerMetric {
    /// Returns the timer metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing counters.
///
/// Counters are simple values incremented or decremented by a client. The rates at which these
/// events occur or average values will be determined by the server receiving them. Examples of
/// counter uses include number of requests received or samples dropped.
///
/// ## Example
///
/// ```
/// use metrelay_statsd::{metric, CounterMetric, MetricsClient};
///
/// enum MyCounter {
///     TotalRequests,
///     TotalBytes,
/// }
///
/// impl CounterMetric for MyCounter {
///     fn name(&self) -> &'static str {
///         match self {
///             Self::TotalRequests => "total_requests",
///             Self::TotalBytes => "total_bytes",
///         }
///     }
/// }
///
/// # let buffer = &[(), ()];
/// let client = MetricsClient::noop();
///
/// // add to the counter
/// metric!(client, counter(MyCounter::TotalRequests) += 1);
/// metric!(client, counter(MyCounter::TotalBytes) += buffer.len() as i64);
///
/// // add to the counter and provide tags
/// metric!(client, counter(MyCounter::TotalRequests) += 1, route = "write");
/// ```
pub trait CounterMetric {
    /// Returns the counter metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing distributions.
///
/// A distribution is often similar to timers. Distributions can be thought of as a
/// more general (not limited to timing things) form of timers.
pub trait DistributionMetric {
    /// Returns the distribution metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// A metric for capturing gauges.
///
/// Gauge values are an instantaneous measurement of a value determined by the client. They do not
/// change unless changed by the client. Examples include the current throughput or how many
/// connections are active.
///
/// ## Example
///
/// ```
/// use metrelay_statsd::{metric, GaugeMetric, MetricsClient};
///
/// struct Throughput;
///
/// impl GaugeMetric for Throughput {
///     fn name(&self) -> &'static str {
///         "throughput"
///     }
/// }
///
/// let client = MetricsClient::noop();
/// metric!(client, gauge(Throughput) = 42.5);
/// ```
pub trait GaugeMetric {
    /// Returns the gauge metric name that will be sent to statsd.
    fn name(&self) -> &'static str;
}

/// Emits a metric through the given client.
///
/// The first argument is anything that dereferences to a [`MetricsClient`], such as
/// `Arc<MetricsClient>`. See [crate-level documentation](self) for examples.
#[macro_export]
macro_rules! metric {
    // counter increment
    ($client:expr, counter($id:expr) += $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {
        match $value {
            value if value != 0 => {
                let client: &$crate::MetricsClient = &$client;
                #[allow(unused_imports)]
                use $crate::_pred::*;
                client.send_metric(
                    client.count_with_tags(&$crate::CounterMetric::name(&$id), value)
                    $(.with_tag(stringify!($($k).*), $v))*
                )
            },
            _ => {},
        };
    };

    // gauge set
    ($client:expr, gauge($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {{
        let client: &$crate::MetricsClient = &$client;
        #[allow(unused_imports)]
        use $crate::_pred::*;
        client.send_metric(
            client.gauge_with_tags(&$crate::GaugeMetric::name(&$id), $value)
                $(.with_tag(stringify!($($k).*), $v))*
        )
    }};

    // distribution
    ($client:expr, distribution($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {{
        let client: &$crate::MetricsClient = &$client;
        #[allow(unused_imports)]
        use $crate::_pred::*;
        client.send_metric(
            client.distribution_with_tags(&$crate::DistributionMetric::name(&$id), $value)
                $(.with_tag(stringify!($($k).*), $v))*
        )
    }};

    // timer value
    ($client:expr, timer($id:expr) = $value:expr $(, $($k:ident).* = $v:expr)* $(,)?) => {{
        let client: &$crate::MetricsClient = &$client;
        #[allow(unused_imports)]
        use $crate::_pred::*;
        client.send_metric(
            // Durations are reported in milliseconds.
            client.distribution_with_tags(
                &$crate::TimerMetric::name(&$id),
                $value.as_nanos() as f64 / 1e6,
            )
            $(.with_tag(stringify!($($k).*), $v))*
        )
    }};

    // timed block
    ($client:expr, timer($id:expr), $($($k:ident).* = $v:expr,)* $block:block) => {{
        let now = std::time::Instant::now();
        let rv = {$block};
        $crate::metric!($client, timer($id) = now.elapsed() $(, $($k).* = $v)*);
        rv
    }};
}
