//! Signing credentials for the backing store.
//!
//! The backing store only needs a secret to sign upload URLs. Where that
//! secret comes from is an environment concern: a fixed configured value, or
//! a token exchanged with a sidecar on the local host.

use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential exchange with `{endpoint}` failed: {reason}")]
    Exchange { endpoint: String, reason: String },
    #[error("credential source returned an empty token")]
    EmptyToken,
}

/// Secret bytes used to sign URLs. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey(Vec<u8>);

impl SigningKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, CredentialError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(CredentialError::EmptyToken);
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningKey(**redacted**)")
    }
}

/// Source of signing credentials for the backing store.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn signing_key(&self) -> Result<SigningKey, CredentialError>;
}

/// Credentials fixed at startup from configuration.
pub struct StaticCredentialProvider {
    secret: String,
}

impl StaticCredentialProvider {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn signing_key(&self) -> Result<SigningKey, CredentialError> {
        SigningKey::new(self.secret.as_bytes())
    }
}

/// Token exchanged with a credential sidecar at `<endpoint>/credential`.
pub struct SidecarCredentialProvider {
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct CredentialResponse {
    access_token: String,
}

impl SidecarCredentialProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn exchange_error(&self, reason: impl ToString) -> CredentialError {
        CredentialError::Exchange {
            endpoint: self.endpoint.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl CredentialProvider for SidecarCredentialProvider {
    async fn signing_key(&self) -> Result<SigningKey, CredentialError> {
        let url = format!("{}/credential", self.endpoint);
        tracing::debug!(%url, "requesting signing credential from sidecar");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.exchange_error(e))?;
        if !response.status().is_success() {
            return Err(self.exchange_error(format!("status {}", response.status())));
        }
        let body: CredentialResponse = response.json().await.map_err(|e| self.exchange_error(e))?;
        SigningKey::new(body.access_token.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_yields_configured_secret() {
        let key = StaticCredentialProvider::new("s3cret")
            .signing_key()
            .await
            .unwrap();
        assert_eq!(key.as_bytes(), b"s3cret");
        assert_eq!(format!("{key:?}"), "SigningKey(**redacted**)");
    }

    #[tokio::test]
    async fn empty_secret_is_rejected() {
        let err = StaticCredentialProvider::new("").signing_key().await;
        assert!(matches!(err, Err(CredentialError::EmptyToken)));
    }

    #[tokio::test]
    async fn unreachable_sidecar_reports_exchange_failure() {
        // Port 9 (discard) is not expected to serve HTTP.
        let provider = SidecarCredentialProvider::new("http://127.0.0.1:9/");
        match provider.signing_key().await {
            Err(CredentialError::Exchange { endpoint, .. }) => {
                assert_eq!(endpoint, "http://127.0.0.1:9")
            }
            other => panic!("expected exchange failure, got {other:?}"),
        }
    }
}
