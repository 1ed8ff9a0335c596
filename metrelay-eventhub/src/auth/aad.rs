use std::fmt;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;

use crate::auth::{AuthError, ClientCertificate, TokenProvider};

/// Scope requested for event hub access.
pub const EVENTHUBS_SCOPE: &str = "https://eventhubs.azure.net/.default";

/// Tokens are refreshed this long before they expire.
const REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

const ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// How the service principal proves its identity.
pub enum AadCredential {
    /// A client secret.
    Secret(String),
    /// A certificate signing client assertions.
    Certificate(ClientCertificate),
}

impl fmt::Debug for AadCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secret(_) => f.write_str("Secret([redacted])"),
            Self::Certificate(certificate) => {
                f.debug_tuple("Certificate").field(certificate).finish()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug)]
struct CachedToken {
    header: String,
    refresh_at: Instant,
}

/// Obtains bearer tokens through the OAuth2 client credentials grant.
///
/// Tokens are cached until shortly before they expire.
#[derive(Debug)]
pub struct AadTokenProvider {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    credential: AadCredential,
    cache: Mutex<Option<CachedToken>>,
}

impl AadTokenProvider {
    /// Creates a provider for the service principal `client_id` in `tenant_id`.
    pub fn new(
        client: reqwest::Client,
        authority_host: &str,
        tenant_id: &str,
        client_id: impl Into<String>,
        credential: AadCredential,
    ) -> Self {
        let token_url = format!(
            "{}/{tenant_id}/oauth2/v2.0/token",
            authority_host.trim_end_matches('/')
        );

        Self {
            client,
            token_url,
            client_id: client_id.into(),
            credential,
            cache: Mutex::new(None),
        }
    }

    /// The token endpoint of the tenant.
    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    fn cached(&self) -> Option<String> {
        let cache = self.cache.lock();
        cache
            .as_ref()
            .filter(|token| token.refresh_at > Instant::now())
            .map(|token| token.header.clone())
    }

    fn form(&self) -> Result<Vec<(&'static str, String)>, AuthError> {
        let mut form = vec![
            ("grant_type", "client_credentials".to_owned()),
            ("client_id", self.client_id.clone()),
            ("scope", EVENTHUBS_SCOPE.to_owned()),
        ];

        match &self.credential {
            AadCredential::Secret(secret) => form.push(("client_secret", secret.clone())),
            AadCredential::Certificate(certificate) => {
                let now = chrono::Utc::now().timestamp();
                let assertion = certificate.assertion(&self.client_id, &self.token_url, now)?;
                form.push(("client_assertion_type", ASSERTION_TYPE.to_owned()));
                form.push(("client_assertion", assertion));
            }
        }

        Ok(form)
    }

    async fn fetch(&self) -> Result<String, AuthError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&self.form()?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(REFRESH_MARGIN);
        let header = format!("Bearer {}", token.access_token);

        metrelay_log::debug!(
            expires_in = token.expires_in,
            "obtained event hub access token"
        );

        *self.cache.lock() = Some(CachedToken {
            header: header.clone(),
            refresh_at: Instant::now() + lifetime,
        });

        Ok(header)
    }
}

#[async_trait]
impl TokenProvider for AadTokenProvider {
    async fn token(&self, _resource_uri: &str) -> Result<String, AuthError> {
        match self.cached() {
            Some(header) => Ok(header),
            None => self.fetch().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(credential: AadCredential) -> AadTokenProvider {
        AadTokenProvider::new(
            reqwest::Client::new(),
            "https://login.microsoftonline.com/",
            "tenant",
            "client",
            credential,
        )
    }

    #[test]
    fn test_token_url() {
        let provider = provider(AadCredential::Secret("secret".to_owned()));
        assert_eq!(
            provider.token_url(),
            "https://login.microsoftonline.com/tenant/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_secret_form() {
        let provider = provider(AadCredential::Secret("secret".to_owned()));
        let form = provider.form().unwrap();
        assert!(form.contains(&("client_secret", "secret".to_owned())));
        assert!(form.contains(&("scope", EVENTHUBS_SCOPE.to_owned())));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let provider = provider(AadCredential::Secret("hunter2".to_owned()));
        assert!(!format!("{provider:?}").contains("hunter2"));
    }

    #[tokio::test]
    async fn test_cached_token() {
        let provider = provider(AadCredential::Secret("secret".to_owned()));
        *provider.cache.lock() = Some(CachedToken {
            header: "Bearer cached".to_owned(),
            refresh_at: Instant::now() + Duration::from_secs(60),
        });
        assert_eq!(provider.token("ignored").await.unwrap(), "Bearer cached");
    }
}
