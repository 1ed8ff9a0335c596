//! Token providers authorizing requests to the event hub.

mod aad;
mod certificate;
mod sas;

use std::fmt;

use async_trait::async_trait;

pub use self::aad::*;
pub use self::certificate::*;
pub use self::sas::*;

/// An error obtaining an authorization token.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The signing key was rejected.
    #[error("invalid signing key")]
    InvalidKey,
    /// The system clock is before the UNIX epoch.
    #[error("system clock is before the unix epoch")]
    Clock,
    /// The token request failed.
    #[error("token request failed")]
    Request(#[from] reqwest::Error),
    /// The authority rejected the token request.
    #[error("authority rejected token request with status {status}: {body}")]
    Rejected {
        /// The HTTP status code.
        status: u16,
        /// The response body.
        body: String,
    },
    /// The certificate bundle could not be read.
    #[error("failed to read certificate bundle")]
    CertificateIo(#[source] std::io::Error),
    /// The certificate bundle holds no certificate.
    #[error("certificate bundle contains no certificate")]
    MissingCertificate,
    /// The certificate bundle holds no encrypted private key.
    #[error("certificate bundle contains no encrypted private key")]
    MissingPrivateKey,
    /// The private key could not be decrypted.
    #[error("failed to decrypt private key")]
    PrivateKey(#[source] rsa::pkcs8::Error),
    /// The client assertion could not be signed.
    #[error("failed to sign client assertion")]
    Signature(#[source] rsa::signature::Error),
    /// The client assertion could not be serialized.
    #[error("failed to serialize client assertion")]
    Assertion(#[source] serde_json::Error),
}

/// Provides values for the `Authorization` header of hub requests.
#[async_trait]
pub trait TokenProvider: Send + Sync + fmt::Debug {
    /// Returns an authorization header value valid for `resource_uri`.
    async fn token(&self, resource_uri: &str) -> Result<String, AuthError>;
}

/// Hands out a fixed, precomputed shared access signature.
pub struct StaticTokenProvider {
    signature: String,
}

impl StaticTokenProvider {
    /// Creates a provider for the given signature.
    pub fn new(signature: impl Into<String>) -> Self {
        Self {
            signature: signature.into(),
        }
    }
}

impl fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenProvider").finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self, _resource_uri: &str) -> Result<String, AuthError> {
        Ok(self.signature.clone())
    }
}
