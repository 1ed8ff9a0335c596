use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use metrelay_eventhub::SinkConfig;
use metrelay_filter::FilterConfig;
use metrelay_log::{LogConfig, LogLevel};
use metrelay_protocol::DEFAULT_MAX_DECODED_SIZE;
use serde::{Deserialize, Serialize};

/// Name of the configuration file within the config directory.
const CONFIG_FILE: &str = "config.yml";

/// Placeholder for secrets in dumped configuration.
const REDACTED: &str = "[redacted]";

/// Defines the source of a config error.
#[derive(Debug)]
enum ConfigErrorSource {
    /// An error occurring independently.
    None,
    /// An error originating from a configuration file.
    File(PathBuf),
    /// An error originating in a field override (an env var, or a CLI parameter).
    FieldOverride(String),
}

/// Indicates config related errors.
#[derive(Debug)]
pub struct ConfigError {
    source: ConfigErrorSource,
    kind: ConfigErrorKind,
    error: Option<Box<dyn Error + Send + Sync>>,
}

impl ConfigError {
    #[inline]
    fn new(kind: ConfigErrorKind) -> Self {
        Self {
            source: ConfigErrorSource::None,
            kind,
            error: None,
        }
    }

    #[inline]
    fn wrap<E>(error: E, kind: ConfigErrorKind) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            error: Some(Box::new(error)),
            ..Self::new(kind)
        }
    }

    #[inline]
    fn for_field<E>(error: E, field: &'static str) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::wrap(error, ConfigErrorKind::InvalidValue).field(field)
    }

    #[inline]
    fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.source = ConfigErrorSource::File(path.as_ref().to_path_buf());
        self
    }

    #[inline]
    fn field(mut self, name: &'static str) -> Self {
        self.source = ConfigErrorSource::FieldOverride(name.to_owned());
        self
    }

    /// Returns the error kind of the error.
    pub fn kind(&self) -> ConfigErrorKind {
        self.kind
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            ConfigErrorSource::None => write!(f, "{}", self.kind),
            ConfigErrorSource::File(file_name) => {
                write!(f, "{} (file {})", self.kind, file_name.display())
            }
            ConfigErrorSource::FieldOverride(name) => write!(f, "{} (field {})", self.kind, name),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.error.as_ref().map(|e| e.as_ref() as &(dyn Error + 'static))
    }
}

/// Indicates config related errors.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, thiserror::Error)]
pub enum ConfigErrorKind {
    /// Failed to open the file.
    #[error("could not open config file")]
    CouldNotOpenFile,
    /// Failed to serialize the configuration.
    #[error("could not write config file")]
    CouldNotWriteFile,
    /// Parsing YAML failed.
    #[error("could not parse yaml config file")]
    BadYaml,
    /// Invalid config value.
    #[error("invalid config value")]
    InvalidValue,
}

/// A boolean override that is neither true nor false.
#[derive(Debug, thiserror::Error)]
#[error("expected true or false, got {0:?}")]
struct InvalidBool(String);

/// A write path that is not absolute.
#[derive(Debug, thiserror::Error)]
#[error("write path must start with '/', got {0:?}")]
struct InvalidWritePath(String);

fn check_write_path(path: &str) -> Result<(), InvalidWritePath> {
    match path.starts_with('/') {
        true => Ok(()),
        false => Err(InvalidWritePath(path.to_owned())),
    }
}

fn parse_bool(value: &str) -> Result<bool, InvalidBool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(InvalidBool(value.to_owned())),
    }
}

/// Structure used to hold information about configuration overrides via CLI parameters or
/// environment variables.
#[derive(Debug, Default)]
pub struct OverridableConfig {
    /// The host the server binds to.
    pub host: Option<String>,
    /// The port the server binds to.
    pub port: Option<String>,
    /// The path of the remote write endpoint.
    pub write_path: Option<String>,
    /// The filter mode.
    pub filter_mode: Option<String>,
    /// Comma-separated metric names for the filter.
    pub filter_names: Option<String>,
    /// Event hub namespace.
    pub namespace: Option<String>,
    /// Event hub name.
    pub hub: Option<String>,
    /// Shared access policy name.
    pub key_name: Option<String>,
    /// Shared access policy key.
    pub key_value: Option<String>,
    /// Event hub connection string.
    pub connection_string: Option<String>,
    /// Service principal tenant.
    pub tenant_id: Option<String>,
    /// Service principal application id.
    pub client_id: Option<String>,
    /// Service principal secret.
    pub client_secret: Option<String>,
    /// Path to the service principal certificate bundle.
    pub cert_path: Option<String>,
    /// Password of the certificate's private key.
    pub cert_password: Option<String>,
    /// "true" for batch delivery, "false" for single delivery.
    pub batch: Option<String>,
    /// Label whose value becomes the partition key.
    pub partition_key_label: Option<String>,
    /// Payload serializer.
    pub serializer: Option<String>,
    /// Log level.
    pub log_level: Option<String>,
    /// Statsd upstream address.
    pub statsd: Option<String>,
    /// Shutdown timeout in seconds.
    pub shutdown_timeout: Option<String>,
}

/// Settings of the HTTP server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
struct Server {
    /// The host the server binds to (network interface).
    host: IpAddr,
    /// The port the server binds to.
    port: u16,
    /// Path of the remote write endpoint.
    write_path: String,
    /// Seconds to wait for a request body.
    read_timeout: u64,
    /// Seconds a write request may take, including delivery to the sink.
    write_timeout: u64,
    /// Seconds to wait for in-flight requests after a shutdown signal.
    shutdown_timeout: u64,
    /// Maximum size of a compressed request body in bytes.
    max_body_size: usize,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 9201,
            write_path: "/write".to_owned(),
            read_timeout: 5,
            write_timeout: 10,
            shutdown_timeout: 10,
            max_body_size: 10 * 1024 * 1024,
        }
    }
}

/// Settings of the processing pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
struct Pipeline {
    /// Substitute for `NaN` sample values.
    nan_value: f64,
    /// Maximum decompressed size of a request body in bytes.
    max_decoded_size: usize,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            nan_value: 0.0,
            max_decoded_size: DEFAULT_MAX_DECODED_SIZE,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
struct Metrics {
    /// Hostname and port of the statsd server.
    ///
    /// Defaults to `None`, which disables metrics.
    statsd: Option<String>,
    /// Common prefix that should be added to all metrics.
    prefix: String,
    /// Default tags to apply to all metrics.
    default_tags: BTreeMap<String, String>,
    /// Tag name to report the hostname to for each metric. Defaults to not sending such a tag.
    hostname_tag: Option<String>,
    /// Pre-aggregate metrics before sending them to statsd.
    aggregate: bool,
    /// Seconds between two throughput samples.
    throughput_interval: u64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            statsd: None,
            prefix: "metrelay".to_owned(),
            default_tags: BTreeMap::new(),
            hostname_tag: None,
            aggregate: true,
            throughput_interval: 1,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct ConfigValues {
    #[serde(default)]
    server: Server,
    #[serde(default, skip_serializing_if = "FilterConfig::is_empty")]
    filter: FilterConfig,
    #[serde(default)]
    sink: SinkConfig,
    #[serde(default)]
    pipeline: Pipeline,
    #[serde(default)]
    logging: LogConfig,
    #[serde(default)]
    metrics: Metrics,
}

impl ConfigValues {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = match fs::File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError::wrap(e, ConfigErrorKind::CouldNotOpenFile).file(path));
            }
        };

        let values: Self = serde_yaml::from_reader(io::BufReader::new(file))
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml).file(path))?;

        values.validate().map_err(|e| e.file(path))?;
        Ok(values)
    }

    /// Checks values that deserialize fine but cannot be used.
    fn validate(&self) -> Result<(), ConfigError> {
        check_write_path(&self.server.write_path)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::InvalidValue))
    }
}

/// Config struct.
#[derive(Clone)]
pub struct Config {
    values: ConfigValues,
    path: PathBuf,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("path", &self.path)
            .field("values", &self.values)
            .finish()
    }
}

impl Config {
    /// Loads a config from a given config folder.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = std::env::current_dir()
            .map(|x| x.join(path.as_ref()))
            .unwrap_or_else(|_| path.as_ref().to_path_buf());

        Ok(Config {
            values: ConfigValues::load(&path.join(CONFIG_FILE))?,
            path,
        })
    }

    /// Parses a config from a YAML string.
    ///
    /// This is mostly useful for tests.
    pub fn from_yaml_str(yaml: &str) -> Result<Config, ConfigError> {
        let values: ConfigValues = serde_yaml::from_str(yaml)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::BadYaml))?;
        values.validate()?;

        Ok(Config {
            values,
            path: PathBuf::new(),
        })
    }

    /// Override configuration with values coming from other sources (e.g. env variables or
    /// command line parameters).
    pub fn apply_override(
        &mut self,
        overrides: OverridableConfig,
    ) -> Result<&mut Self, ConfigError> {
        let server = &mut self.values.server;

        if let Some(host) = overrides.host {
            server.host = host
                .parse::<IpAddr>()
                .map_err(|err| ConfigError::for_field(err, "host"))?;
        }

        if let Some(port) = overrides.port {
            server.port = port
                .parse()
                .map_err(|err| ConfigError::for_field(err, "port"))?;
        }

        if let Some(write_path) = overrides.write_path {
            check_write_path(&write_path)
                .map_err(|err| ConfigError::for_field(err, "write_path"))?;
            server.write_path = write_path;
        }

        if let Some(shutdown_timeout) = overrides.shutdown_timeout {
            server.shutdown_timeout = shutdown_timeout
                .parse()
                .map_err(|err| ConfigError::for_field(err, "shutdown_timeout"))?;
        }

        let filter = &mut self.values.filter;
        if let Some(mode) = overrides.filter_mode {
            filter.mode = mode;
        }

        if let Some(names) = overrides.filter_names {
            filter.names = names
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_owned)
                .collect();
        }

        let sink = &mut self.values.sink;
        let strings = [
            (&mut sink.namespace, overrides.namespace),
            (&mut sink.hub, overrides.hub),
            (&mut sink.key_name, overrides.key_name),
            (&mut sink.key_value, overrides.key_value),
            (&mut sink.connection_string, overrides.connection_string),
            (&mut sink.tenant_id, overrides.tenant_id),
            (&mut sink.client_id, overrides.client_id),
            (&mut sink.client_secret, overrides.client_secret),
            (&mut sink.cert_password, overrides.cert_password),
            (&mut sink.partition_key_label, overrides.partition_key_label),
        ];

        for (field, value) in strings {
            if value.is_some() {
                *field = value;
            }
        }

        if let Some(cert_path) = overrides.cert_path {
            sink.cert_path = Some(PathBuf::from(cert_path));
        }

        if let Some(batch) = overrides.batch {
            sink.batch = parse_bool(&batch).map_err(|err| ConfigError::for_field(err, "batch"))?;
        }

        if let Some(serializer) = overrides.serializer {
            sink.serializer = serializer;
        }

        if let Some(level) = overrides.log_level {
            self.values.logging.level = level
                .parse::<LogLevel>()
                .map_err(|err| ConfigError::for_field(err, "log_level"))?;
        }

        if let Some(statsd) = overrides.statsd {
            self.values.metrics.statsd = Some(statsd).filter(|s| !s.is_empty());
        }

        Ok(self)
    }

    /// Serializes the configuration to YAML with all secrets redacted.
    pub fn to_yaml_string(&self) -> Result<String, ConfigError> {
        let mut values = self.values.clone();
        let sink = &mut values.sink;
        for secret in [
            &mut sink.key_value,
            &mut sink.connection_string,
            &mut sink.client_secret,
            &mut sink.cert_password,
        ] {
            if secret.is_some() {
                *secret = Some(REDACTED.to_owned());
            }
        }

        serde_yaml::to_string(&values)
            .map_err(|e| ConfigError::wrap(e, ConfigErrorKind::CouldNotWriteFile))
    }

    /// Returns the config directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the socket address the server binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        (self.values.server.host, self.values.server.port).into()
    }

    /// Returns the path of the remote write endpoint.
    pub fn write_path(&self) -> &str {
        &self.values.server.write_path
    }

    /// Returns the time to wait for a request body.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.values.server.read_timeout)
    }

    /// Returns the deadline of a write request.
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.values.server.write_timeout)
    }

    /// Returns the time to wait for in-flight requests during shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.values.server.shutdown_timeout)
    }

    /// Returns the maximum size of a request body in bytes.
    pub fn max_body_size(&self) -> usize {
        self.values.server.max_body_size
    }

    /// Returns the sample filter configuration.
    pub fn filter(&self) -> &FilterConfig {
        &self.values.filter
    }

    /// Returns the event hub sink configuration.
    pub fn sink(&self) -> &SinkConfig {
        &self.values.sink
    }

    /// Returns the substitute for `NaN` sample values.
    pub fn nan_value(&self) -> f64 {
        self.values.pipeline.nan_value
    }

    /// Maximum decompressed size of a write request body in bytes.
    pub fn max_decoded_size(&self) -> usize {
        self.values.pipeline.max_decoded_size
    }

    /// Returns the logging configuration.
    pub fn logging(&self) -> &LogConfig {
        &self.values.logging
    }

    /// Returns the socket address of statsd if configured.
    pub fn statsd_addr(&self) -> Option<&str> {
        self.values.metrics.statsd.as_deref()
    }

    /// Returns the prefix for statsd metrics.
    pub fn metrics_prefix(&self) -> &str {
        &self.values.metrics.prefix
    }

    /// Returns the default tags for statsd metrics.
    pub fn metrics_default_tags(&self) -> &BTreeMap<String, String> {
        &self.values.metrics.default_tags
    }

    /// Returns the name of the hostname tag that should be attached to each outgoing metric.
    pub fn metrics_hostname_tag(&self) -> Option<&str> {
        self.values.metrics.hostname_tag.as_deref()
    }

    /// Returns `true` if metrics are aggregated before they are sent.
    pub fn metrics_aggregate(&self) -> bool {
        self.values.metrics.aggregate
    }

    /// Returns the interval between two throughput samples.
    pub fn throughput_interval(&self) -> Duration {
        Duration::from_secs(self.values.metrics.throughput_interval.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            values: ConfigValues::default(),
            path: PathBuf::new(),
        }
    }
}
