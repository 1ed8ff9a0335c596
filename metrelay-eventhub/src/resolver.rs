//! Picks exactly one authentication strategy for a [`SinkConfig`].
//!
//! Strategies are tried in a fixed priority order:
//!
//! 1. [`CredentialStrategy::ConnectionString`] whenever a connection string is present
//! 2. [`CredentialStrategy::SharedKey`]
//! 3. [`CredentialStrategy::ClientSecret`]
//! 4. [`CredentialStrategy::Certificate`]
//!
//! A strategy that applies but fails to construct its token provider is logged and skipped.

use std::fmt;
use std::sync::Arc;

use metrelay_log::LogError;

use crate::auth::{
    AadCredential, AadTokenProvider, ClientCertificate, SasTokenProvider, StaticTokenProvider,
    TokenProvider,
};
use crate::config::{namespace_host, present};
use crate::{ConnectionString, HubTarget, SinkConfig, SinkError};

/// The authentication strategy chosen by [`resolve_credential`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CredentialStrategy {
    /// A namespace or hub connection string.
    ConnectionString,
    /// A shared access policy name and key.
    SharedKey,
    /// A service principal with a client secret.
    ClientSecret,
    /// A service principal with a certificate.
    Certificate,
}

impl CredentialStrategy {
    /// Returns the name used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionString => "connection_string",
            Self::SharedKey => "shared_key",
            Self::ClientSecret => "client_secret",
            Self::Certificate => "certificate",
        }
    }
}

impl fmt::Display for CredentialStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved destination with the provider authorizing requests to it.
#[derive(Clone, Debug)]
pub struct ResolvedCredential {
    /// The strategy that produced this credential.
    pub strategy: CredentialStrategy,
    /// The destination hub.
    pub target: HubTarget,
    /// Issues authorization headers.
    pub provider: Arc<dyn TokenProvider>,
}

/// An error constructing a single strategy.
#[derive(Debug, thiserror::Error)]
pub(crate) enum StrategyError {
    #[error(transparent)]
    ConnectionString(#[from] crate::ConnectionStringError),
    #[error("connection string names no event hub and none is configured")]
    MissingHub,
    #[error(transparent)]
    Auth(#[from] crate::auth::AuthError),
    #[error("failed to create http client")]
    Client(#[source] reqwest::Error),
}

type Build = fn(&SinkConfig) -> Result<(HubTarget, Arc<dyn TokenProvider>), StrategyError>;

/// One entry of the priority list: a predicate deciding whether the strategy applies and the
/// constructor of its provider.
pub(crate) struct Strategy {
    kind: CredentialStrategy,
    applies: fn(&SinkConfig) -> bool,
    build: Build,
}

const STRATEGIES: &[Strategy] = &[
    Strategy {
        kind: CredentialStrategy::ConnectionString,
        applies: |c| present(&c.connection_string).is_some(),
        build: connection_string,
    },
    Strategy {
        kind: CredentialStrategy::SharedKey,
        applies: |c| {
            has_target(c) && present(&c.key_name).is_some() && present(&c.key_value).is_some()
        },
        build: shared_key,
    },
    Strategy {
        kind: CredentialStrategy::ClientSecret,
        applies: |c| has_principal(c) && present(&c.client_secret).is_some(),
        build: client_secret,
    },
    Strategy {
        kind: CredentialStrategy::Certificate,
        applies: |c| {
            has_principal(c) && c.cert_path.is_some() && present(&c.cert_password).is_some()
        },
        build: certificate,
    },
];

/// Resolves the destination and credential of a sink.
///
/// Fails with [`SinkError::Configuration`] if no strategy applies or every applicable strategy
/// fails.
pub fn resolve_credential(config: &SinkConfig) -> Result<ResolvedCredential, SinkError> {
    resolve_with(STRATEGIES, config)
}

pub(crate) fn resolve_with(
    strategies: &[Strategy],
    config: &SinkConfig,
) -> Result<ResolvedCredential, SinkError> {
    for strategy in strategies {
        if !(strategy.applies)(config) {
            continue;
        }

        match (strategy.build)(config) {
            Ok((target, provider)) => {
                metrelay_log::debug!(strategy = strategy.kind.as_str(), "resolved hub credential");
                return Ok(ResolvedCredential {
                    strategy: strategy.kind,
                    target,
                    provider,
                });
            }
            Err(error) => {
                metrelay_log::error!(
                    strategy = strategy.kind.as_str(),
                    "failed to create token provider: {}",
                    LogError(&error)
                );
            }
        }
    }

    Err(SinkError::Configuration)
}

fn has_target(config: &SinkConfig) -> bool {
    present(&config.namespace).is_some() && present(&config.hub).is_some()
}

fn has_principal(config: &SinkConfig) -> bool {
    has_target(config)
        && present(&config.tenant_id).is_some()
        && present(&config.client_id).is_some()
}

/// Target from `namespace` and `hub`. Only called after the predicate checked both.
fn configured_target(config: &SinkConfig) -> HubTarget {
    HubTarget {
        host: namespace_host(present(&config.namespace).unwrap_or_default()),
        hub: present(&config.hub).unwrap_or_default().to_owned(),
    }
}

fn connection_string(
    config: &SinkConfig,
) -> Result<(HubTarget, Arc<dyn TokenProvider>), StrategyError> {
    let parsed: ConnectionString = present(&config.connection_string)
        .unwrap_or_default()
        .parse()?;

    let hub = parsed
        .entity_path
        .clone()
        .or_else(|| present(&config.hub).map(str::to_owned))
        .ok_or(StrategyError::MissingHub)?;

    let provider: Arc<dyn TokenProvider> = match (parsed.key_name, parsed.key, parsed.signature) {
        (Some(key_name), Some(key), _) => Arc::new(SasTokenProvider::new(key_name, key)?),
        (_, _, Some(signature)) => Arc::new(StaticTokenProvider::new(signature)),
        _ => return Err(crate::ConnectionStringError::MissingCredentials.into()),
    };

    let target = HubTarget {
        host: parsed.host,
        hub,
    };
    Ok((target, provider))
}

fn shared_key(config: &SinkConfig) -> Result<(HubTarget, Arc<dyn TokenProvider>), StrategyError> {
    let provider = SasTokenProvider::new(
        present(&config.key_name).unwrap_or_default(),
        present(&config.key_value).unwrap_or_default(),
    )?;
    Ok((configured_target(config), Arc::new(provider)))
}

fn aad_provider(
    config: &SinkConfig,
    credential: AadCredential,
) -> Result<AadTokenProvider, StrategyError> {
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()
        .map_err(StrategyError::Client)?;

    Ok(AadTokenProvider::new(
        client,
        &config.authority_host,
        present(&config.tenant_id).unwrap_or_default(),
        present(&config.client_id).unwrap_or_default(),
        credential,
    ))
}

fn client_secret(
    config: &SinkConfig,
) -> Result<(HubTarget, Arc<dyn TokenProvider>), StrategyError> {
    let secret = present(&config.client_secret).unwrap_or_default().to_owned();
    let provider = aad_provider(config, AadCredential::Secret(secret))?;
    Ok((configured_target(config), Arc::new(provider)))
}

fn certificate(
    config: &SinkConfig,
) -> Result<(HubTarget, Arc<dyn TokenProvider>), StrategyError> {
    let path = config.cert_path.as_deref().unwrap_or(std::path::Path::new(""));
    let password = present(&config.cert_password).unwrap_or_default();
    let certificate = ClientCertificate::from_pem_file(path, password)?;

    metrelay_log::debug!(
        thumbprint = certificate.thumbprint(),
        "loaded service principal certificate"
    );

    let provider = aad_provider(config, AadCredential::Certificate(certificate))?;
    Ok((configured_target(config), Arc::new(provider)))
}
