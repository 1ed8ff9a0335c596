use std::str::FromStr;

use url::Url;

/// An error parsing a connection string.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConnectionStringError {
    /// A segment is not a `key=value` pair.
    #[error("invalid connection string segment {0:?}")]
    InvalidSegment(String),
    /// The `Endpoint` key is missing.
    #[error("connection string has no endpoint")]
    MissingEndpoint,
    /// The endpoint is not a URL with a host.
    #[error("invalid connection string endpoint {0:?}")]
    InvalidEndpoint(String),
    /// Neither a shared key nor a signature is present.
    #[error("connection string has neither a shared access key nor a signature")]
    MissingCredentials,
}

/// A parsed namespace or hub connection string.
///
/// ```text
/// Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=send;SharedAccessKey=...;EntityPath=hub
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    /// Host of the namespace.
    pub host: String,
    /// Name of the shared access policy.
    pub key_name: Option<String>,
    /// Key of the shared access policy.
    pub key: Option<String>,
    /// A precomputed shared access signature.
    pub signature: Option<String>,
    /// Name of the event hub.
    pub entity_path: Option<String>,
}

impl std::fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionString")
            .field("host", &self.host)
            .field("key_name", &self.key_name)
            .field("entity_path", &self.entity_path)
            .finish_non_exhaustive()
    }
}

impl FromStr for ConnectionString {
    type Err = ConnectionStringError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;
        let mut signature = None;
        let mut entity_path = None;

        for segment in s.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (name, value) = segment
                .split_once('=')
                .ok_or_else(|| ConnectionStringError::InvalidSegment(segment.to_owned()))?;

            let value = Some(value.trim().to_owned());
            match name.trim().to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = value,
                "sharedaccesskeyname" => key_name = value,
                "sharedaccesskey" => key = value,
                "sharedaccesssignature" => signature = value,
                "entitypath" => entity_path = value,
                _ => {}
            }
        }

        let endpoint = endpoint.ok_or(ConnectionStringError::MissingEndpoint)?;
        let host = Url::parse(&endpoint)
            .ok()
            .and_then(|url| url.host_str().map(str::to_owned))
            .ok_or_else(|| ConnectionStringError::InvalidEndpoint(endpoint.clone()))?;

        let has_key = key_name.is_some() && key.is_some();
        if !has_key && signature.is_none() {
            return Err(ConnectionStringError::MissingCredentials);
        }

        Ok(Self {
            host,
            key_name,
            key,
            signature,
            entity_path: entity_path.filter(|p| !p.is_empty()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let parsed: ConnectionString = "Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=send;SharedAccessKey=c2VjcmV0=;EntityPath=metrics"
            .parse()
            .unwrap();

        assert_eq!(parsed.host, "ns.servicebus.windows.net");
        assert_eq!(parsed.key_name.as_deref(), Some("send"));
        // Only the first `=` separates key and value.
        assert_eq!(parsed.key.as_deref(), Some("c2VjcmV0="));
        assert_eq!(parsed.entity_path.as_deref(), Some("metrics"));
    }

    #[test]
    fn test_parse_signature() {
        let parsed: ConnectionString =
            "endpoint=sb://ns.servicebus.windows.net;sharedaccesssignature=SharedAccessSignature sr=x&sig=y"
                .parse()
                .unwrap();
        assert_eq!(
            parsed.signature.as_deref(),
            Some("SharedAccessSignature sr=x&sig=y")
        );
        assert_eq!(parsed.entity_path, None);
    }

    #[test]
    fn test_missing_endpoint() {
        let result = "SharedAccessKeyName=a;SharedAccessKey=b".parse::<ConnectionString>();
        assert_eq!(result, Err(ConnectionStringError::MissingEndpoint));
    }

    #[test]
    fn test_missing_credentials() {
        let result = "Endpoint=sb://ns.servicebus.windows.net/;SharedAccessKeyName=a"
            .parse::<ConnectionString>();
        assert_eq!(result, Err(ConnectionStringError::MissingCredentials));
    }

    #[test]
    fn test_invalid_segment() {
        let result = "Endpoint=sb://ns/;garbage".parse::<ConnectionString>();
        assert_eq!(
            result,
            Err(ConnectionStringError::InvalidSegment("garbage".to_owned()))
        );
    }
}
