//! Configuration of the event hub sink.
//!
//! Exactly one of the credential bundles must be resolvable:
//! - `connection_string`
//! - `namespace`, `hub`, `key_name` and `key_value`
//! - `namespace`, `hub`, `tenant_id`, `client_id` and `client_secret`
//! - `namespace`, `hub`, `tenant_id`, `client_id`, `cert_path` and `cert_password`

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// DNS suffix of event hub namespaces in the public cloud.
const NAMESPACE_SUFFIX: &str = "servicebus.windows.net";

/// Configuration of the event hub destination.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Namespace name (`myns`) or fully qualified host (`myns.servicebus.windows.net`).
    pub namespace: Option<String>,
    /// Name of the event hub.
    pub hub: Option<String>,
    /// Name of the shared access policy.
    pub key_name: Option<String>,
    /// Key of the shared access policy.
    pub key_value: Option<String>,
    /// Full connection string of the namespace or hub.
    pub connection_string: Option<String>,
    /// Directory tenant of the service principal.
    pub tenant_id: Option<String>,
    /// Application id of the service principal.
    pub client_id: Option<String>,
    /// Secret of the service principal.
    pub client_secret: Option<String>,
    /// PEM bundle with the service principal certificate and its encrypted private key.
    pub cert_path: Option<PathBuf>,
    /// Password of the private key in `cert_path`.
    pub cert_password: Option<String>,
    /// Send all samples of a request in one call instead of one call per sample.
    pub batch: bool,
    /// Name of the label whose value is used as the partition key.
    pub partition_key_label: Option<String>,
    /// Ingestion mapping reference attached to single messages.
    pub ingestion_mapping: String,
    /// Payload codec, `json` or `avro-json`.
    pub serializer: String,
    /// Authority used for service principal tokens.
    pub authority_host: String,
    /// Timeout for requests to the event hub and the authority, in seconds.
    pub request_timeout: u64,
}

impl SinkConfig {
    /// Returns the request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Returns the host of the configured namespace.
    pub fn namespace_host(&self) -> Option<String> {
        present(&self.namespace).map(namespace_host)
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            hub: None,
            key_name: None,
            key_value: None,
            connection_string: None,
            tenant_id: None,
            client_id: None,
            client_secret: None,
            cert_path: None,
            cert_password: None,
            batch: true,
            partition_key_label: None,
            ingestion_mapping: "promMap".to_owned(),
            serializer: "json".to_owned(),
            authority_host: "https://login.microsoftonline.com".to_owned(),
            request_timeout: 20,
        }
    }
}

fn redact<T>(value: &Option<T>) -> Option<&'static str> {
    value.as_ref().map(|_| "[redacted]")
}

impl fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkConfig")
            .field("namespace", &self.namespace)
            .field("hub", &self.hub)
            .field("key_name", &self.key_name)
            .field("key_value", &redact(&self.key_value))
            .field("connection_string", &redact(&self.connection_string))
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &redact(&self.client_secret))
            .field("cert_path", &self.cert_path)
            .field("cert_password", &redact(&self.cert_password))
            .field("batch", &self.batch)
            .field("partition_key_label", &self.partition_key_label)
            .field("ingestion_mapping", &self.ingestion_mapping)
            .field("serializer", &self.serializer)
            .field("authority_host", &self.authority_host)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Returns the value if it is set and not blank.
pub(crate) fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Expands a bare namespace name into its host.
pub(crate) fn namespace_host(namespace: &str) -> String {
    if namespace.contains('.') {
        namespace.to_owned()
    } else {
        format!("{namespace}.{NAMESPACE_SUFFIX}")
    }
}

/// The resolved destination of the sink.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct HubTarget {
    /// Host of the namespace.
    pub host: String,
    /// Name of the event hub.
    pub hub: String,
}

impl HubTarget {
    /// The resource URI of the hub, used as the token audience.
    pub fn resource_uri(&self) -> String {
        format!("https://{}/{}", self.host, self.hub)
    }
}

impl fmt::Display for HubTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.host, self.hub)
    }
}
