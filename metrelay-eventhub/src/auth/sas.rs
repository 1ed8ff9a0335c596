use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use data_encoding::BASE64;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::auth::{AuthError, TokenProvider};

/// Lifetime of generated signatures.
const TOKEN_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Signs shared access signatures with a policy key.
pub struct SasTokenProvider {
    key_name: String,
    key: String,
}

impl SasTokenProvider {
    /// Creates a provider for the shared access policy `key_name`.
    pub fn new(key_name: impl Into<String>, key: impl Into<String>) -> Result<Self, AuthError> {
        let provider = Self {
            key_name: key_name.into(),
            key: key.into(),
        };

        if provider.key_name.is_empty() || provider.key.is_empty() {
            return Err(AuthError::InvalidKey);
        }

        Ok(provider)
    }

    /// Creates a signature for `resource_uri` expiring at `expiry` seconds since the epoch.
    pub fn sign(&self, resource_uri: &str, expiry: u64) -> Result<String, AuthError> {
        let encoded_uri = encode(resource_uri);
        let to_sign = format!("{encoded_uri}\n{expiry}");

        let mut mac = Hmac::<Sha256>::new_from_slice(self.key.as_bytes())
            .map_err(|_| AuthError::InvalidKey)?;
        mac.update(to_sign.as_bytes());
        let signature = BASE64.encode(&mac.finalize().into_bytes());

        Ok(format!(
            "SharedAccessSignature sr={encoded_uri}&sig={}&se={expiry}&skn={}",
            encode(&signature),
            self.key_name
        ))
    }
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

impl fmt::Debug for SasTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SasTokenProvider")
            .field("key_name", &self.key_name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenProvider for SasTokenProvider {
    async fn token(&self, resource_uri: &str) -> Result<String, AuthError> {
        let expiry = (SystemTime::now() + TOKEN_LIFETIME)
            .duration_since(UNIX_EPOCH)
            .map_err(|_| AuthError::Clock)?
            .as_secs();

        self.sign(resource_uri, expiry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_format() {
        let provider = SasTokenProvider::new("send", "c2VjcmV0").unwrap();
        let token = provider
            .sign("https://ns.servicebus.windows.net/metrics", 1_700_000_000)
            .unwrap();

        assert!(token.starts_with(
            "SharedAccessSignature sr=https%3A%2F%2Fns.servicebus.windows.net%2Fmetrics&sig="
        ));
        assert!(token.ends_with("&se=1700000000&skn=send"));
    }

    #[test]
    fn test_sign_verifies() {
        let provider = SasTokenProvider::new("send", "key").unwrap();
        let token = provider.sign("https://a/b", 42).unwrap();

        let sig = token
            .split('&')
            .find_map(|part| part.strip_prefix("sig="))
            .unwrap();
        let sig: String = url::form_urlencoded::parse(format!("s={sig}").as_bytes())
            .next()
            .unwrap()
            .1
            .into_owned();

        let mut mac = Hmac::<Sha256>::new_from_slice(b"key").unwrap();
        mac.update(b"https%3A%2F%2Fa%2Fb\n42");
        mac.verify_slice(&BASE64.decode(sig.as_bytes()).unwrap())
            .unwrap();
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(
            SasTokenProvider::new("send", ""),
            Err(AuthError::InvalidKey)
        ));
    }

    #[tokio::test]
    async fn test_token_expires_in_future() {
        let provider = SasTokenProvider::new("send", "key").unwrap();
        let token = provider.token("https://a/b").await.unwrap();
        let expiry: u64 = token
            .split('&')
            .find_map(|part| part.strip_prefix("se="))
            .unwrap()
            .parse()
            .unwrap();

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        assert!(expiry > now + 3500);
    }
}
