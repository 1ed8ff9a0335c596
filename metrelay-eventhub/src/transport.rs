//! Transport to the event hub REST endpoint.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};

use crate::auth::{AuthError, TokenProvider};
use crate::{HubTarget, ResolvedCredential, SinkConfig, SinkError};

const API_VERSION: &str = "2014-01";
const BATCH_CONTENT_TYPE: &str = "application/vnd.microsoft.servicebus.json";
const SINGLE_CONTENT_TYPE: &str = "application/atom+xml;type=entry;charset=utf-8";

/// An error talking to the event hub.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No authorization token could be obtained.
    #[error("failed to authorize request")]
    Auth(#[from] AuthError),
    /// The request could not be sent.
    #[error("request to event hub failed")]
    Http(#[from] reqwest::Error),
    /// The hub answered with an error status.
    #[error("event hub responded with status {status}: {body}")]
    Status {
        /// The HTTP status code.
        status: u16,
        /// The response body.
        body: String,
    },
    /// The runtime information could not be parsed.
    #[error("invalid hub description")]
    Description(#[from] quick_xml::DeError),
    /// A message could not be encoded into a request.
    #[error("invalid message")]
    Message(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The transport has been closed.
    #[error("transport is closed")]
    Closed,
}

/// Metadata of the destination hub.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RuntimeInfo {
    /// The path (name) of the hub.
    pub path: String,
    /// Number of partitions.
    pub partition_count: u32,
    /// Creation time as reported by the hub.
    pub created_at: Option<String>,
}

/// One event submitted to the hub.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HubMessage {
    /// The encoded payload.
    pub body: Vec<u8>,
    /// Optional partition key routing the event.
    pub partition_key: Option<String>,
    /// Application properties of the event.
    pub properties: BTreeMap<String, String>,
}

/// Submits events to an event hub.
///
/// Implementations must support concurrent calls from multiple requests.
#[async_trait]
pub trait HubTransport: Send + Sync + fmt::Debug {
    /// Fetches metadata of the hub.
    async fn runtime_info(&self) -> Result<RuntimeInfo, TransportError>;

    /// Submits a single event.
    async fn send(&self, message: HubMessage) -> Result<(), TransportError>;

    /// Submits all events in one call.
    async fn send_batch(&self, messages: Vec<HubMessage>) -> Result<(), TransportError>;

    /// Releases the transport. Further sends fail with [`TransportError::Closed`].
    async fn close(&self) -> Result<(), TransportError>;
}

/// Creates transports for resolved credentials.
pub trait Connector: Send + Sync {
    /// Creates a transport to `credential.target`.
    fn transport(
        &self,
        config: &SinkConfig,
        credential: ResolvedCredential,
    ) -> Result<Arc<dyn HubTransport>, SinkError>;
}

/// Connects through the HTTPS REST endpoint of the namespace.
#[derive(Debug, Default)]
pub struct RestConnector;

impl Connector for RestConnector {
    fn transport(
        &self,
        config: &SinkConfig,
        credential: ResolvedCredential,
    ) -> Result<Arc<dyn HubTransport>, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(SinkError::Client)?;

        Ok(Arc::new(RestTransport::new(
            client,
            credential.target,
            credential.provider,
        )))
    }
}

/// [`HubTransport`] over the event hub REST API.
pub struct RestTransport {
    client: reqwest::Client,
    target: HubTarget,
    provider: Arc<dyn TokenProvider>,
    closed: AtomicBool,
}

impl RestTransport {
    /// Creates a transport to `target` authorized by `provider`.
    pub fn new(
        client: reqwest::Client,
        target: HubTarget,
        provider: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            client,
            target,
            provider,
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        match self.closed.load(Ordering::Acquire) {
            true => Err(TransportError::Closed),
            false => Ok(()),
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/messages", self.target.resource_uri())
    }

    async fn authorization(&self) -> Result<String, TransportError> {
        Ok(self.provider.token(&self.target.resource_uri()).await?)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(TransportError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

impl fmt::Debug for RestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestTransport")
            .field("target", &self.target)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl HubTransport for RestTransport {
    async fn runtime_info(&self) -> Result<RuntimeInfo, TransportError> {
        self.ensure_open()?;

        let response = self
            .client
            .get(self.target.resource_uri())
            .query(&[("api-version", API_VERSION)])
            .header(AUTHORIZATION, self.authorization().await?)
            .send()
            .await?;

        let text = Self::check(response).await?.text().await?;
        parse_description(&text)
    }

    async fn send(&self, message: HubMessage) -> Result<(), TransportError> {
        self.ensure_open()?;

        let headers = single_headers(&message)?;
        let response = self
            .client
            .post(self.messages_url())
            .query(&[("api-version", API_VERSION)])
            .header(AUTHORIZATION, self.authorization().await?)
            .header(CONTENT_TYPE, SINGLE_CONTENT_TYPE)
            .headers(headers)
            .body(message.body)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    async fn send_batch(&self, messages: Vec<HubMessage>) -> Result<(), TransportError> {
        self.ensure_open()?;

        let body = batch_body(&messages)?;
        let response = self
            .client
            .post(self.messages_url())
            .query(&[("api-version", API_VERSION)])
            .header(AUTHORIZATION, self.authorization().await?)
            .header(CONTENT_TYPE, BATCH_CONTENT_TYPE)
            .body(body)
            .send()
            .await?;

        Self::check(response).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct BrokerProperties<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    partition_key: Option<&'a str>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct BatchEntry<'a> {
    body: std::borrow::Cow<'a, str>,
    broker_properties: BrokerProperties<'a>,
    #[serde(skip_serializing_if = "is_empty")]
    user_properties: &'a BTreeMap<String, String>,
}

fn is_empty(properties: &&BTreeMap<String, String>) -> bool {
    properties.is_empty()
}

fn batch_body(messages: &[HubMessage]) -> Result<Vec<u8>, TransportError> {
    let entries: Vec<_> = messages
        .iter()
        .map(|message| BatchEntry {
            body: String::from_utf8_lossy(&message.body),
            broker_properties: BrokerProperties {
                partition_key: message.partition_key.as_deref(),
            },
            user_properties: &message.properties,
        })
        .collect();

    serde_json::to_vec(&entries).map_err(|e| TransportError::Message(Box::new(e)))
}

fn single_headers(message: &HubMessage) -> Result<HeaderMap, TransportError> {
    let mut headers = HeaderMap::new();

    let broker = BrokerProperties {
        partition_key: message.partition_key.as_deref(),
    };
    let broker = serde_json::to_string(&broker).map_err(|e| TransportError::Message(Box::new(e)))?;
    headers.insert(
        HeaderName::from_static("brokerproperties"),
        HeaderValue::from_str(&broker).map_err(|e| TransportError::Message(Box::new(e)))?,
    );

    for (name, value) in &message.properties {
        let name =
            HeaderName::try_from(name.as_str()).map_err(|e| TransportError::Message(Box::new(e)))?;
        let value = HeaderValue::from_str(value).map_err(|e| TransportError::Message(Box::new(e)))?;
        headers.insert(name, value);
    }

    Ok(headers)
}

#[derive(Debug, Deserialize)]
struct Entry {
    title: Text,
    content: Content,
}

#[derive(Debug, Deserialize)]
struct Text {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(rename = "EventHubDescription")]
    description: Description,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Description {
    partition_count: u32,
    #[serde(default)]
    created_at: Option<String>,
}

fn parse_description(xml: &str) -> Result<RuntimeInfo, TransportError> {
    let entry: Entry = quick_xml::de::from_str(xml)?;
    Ok(RuntimeInfo {
        path: entry.title.value,
        partition_count: entry.content.description.partition_count,
        created_at: entry.content.description.created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTION: &str = r#"<entry xmlns="http://www.w3.org/2005/Atom">
  <id>https://ns.servicebus.windows.net/metrics?api-version=2014-01</id>
  <title type="text">metrics</title>
  <updated>2024-01-01T00:00:00Z</updated>
  <author><name>ns</name></author>
  <link rel="self" href="https://ns.servicebus.windows.net/metrics?api-version=2014-01"/>
  <content type="application/xml">
    <EventHubDescription xmlns="http://schemas.microsoft.com/netservices/2010/10/servicebus/connect" xmlns:i="http://www.w3.org/2001/XMLSchema-instance">
      <MessageRetentionInDays>1</MessageRetentionInDays>
      <Status>Active</Status>
      <CreatedAt>2024-01-01T00:00:00.000Z</CreatedAt>
      <PartitionCount>4</PartitionCount>
    </EventHubDescription>
  </content>
</entry>"#;

    #[test]
    fn test_parse_description() {
        let info = parse_description(DESCRIPTION).unwrap();
        assert_eq!(
            info,
            RuntimeInfo {
                path: "metrics".to_owned(),
                partition_count: 4,
                created_at: Some("2024-01-01T00:00:00.000Z".to_owned()),
            }
        );
    }

    #[test]
    fn test_parse_invalid_description() {
        assert!(matches!(
            parse_description("<entry><title>x</title></entry>"),
            Err(TransportError::Description(_))
        ));
    }

    #[test]
    fn test_batch_body() {
        let messages = vec![
            HubMessage {
                body: br#"{"name":"up"}"#.to_vec(),
                partition_key: Some("node-1".to_owned()),
                properties: BTreeMap::new(),
            },
            HubMessage {
                body: b"plain".to_vec(),
                partition_key: None,
                properties: BTreeMap::from([("Table".to_owned(), "up".to_owned())]),
            },
        ];

        let body = String::from_utf8(batch_body(&messages).unwrap()).unwrap();
        insta::assert_snapshot!(body, @r#"[{"Body":"{\"name\":\"up\"}","BrokerProperties":{"PartitionKey":"node-1"}},{"Body":"plain","BrokerProperties":{},"UserProperties":{"Table":"up"}}]"#);
    }

    #[test]
    fn test_single_headers() {
        let message = HubMessage {
            body: Vec::new(),
            partition_key: Some("node-1".to_owned()),
            properties: BTreeMap::from([
                ("Table".to_owned(), "up".to_owned()),
                ("Format".to_owned(), "json".to_owned()),
            ]),
        };

        let headers = single_headers(&message).unwrap();
        assert_eq!(headers["brokerproperties"], r#"{"PartitionKey":"node-1"}"#);
        assert_eq!(headers["table"], "up");
        assert_eq!(headers["format"], "json");
    }

    #[tokio::test]
    async fn test_closed_transport_rejects_sends() {
        let transport = RestTransport::new(
            reqwest::Client::new(),
            HubTarget {
                host: "ns.servicebus.windows.net".to_owned(),
                hub: "metrics".to_owned(),
            },
            Arc::new(crate::auth::StaticTokenProvider::new("sig")),
        );

        transport.close().await.unwrap();
        assert!(matches!(
            transport.send(HubMessage::default()).await,
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            transport.send_batch(vec![]).await,
            Err(TransportError::Closed)
        ));
    }
}
