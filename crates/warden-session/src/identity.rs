//! Identity-provider fallback for unknown session identifiers.
//!
//! When a lookup misses, the manager can ask an external identity endpoint
//! whether the identifier is a valid bearer token and, if so, mint a local
//! session bound to the returned identity.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Identity returned by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassportInfo {
    /// Stable identity identifier; becomes the session's user id.
    pub passport_id: String,
    /// Kind of identity (e.g. `email`, `phone`).
    pub identity_type: String,
    /// Raw identifier string as the user entered it.
    pub identifier: String,
}

/// Resolves an opaque token to an identity.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Look up `token`.
    ///
    /// `Ok(None)` means the provider does not know the token.
    async fn resolve(&self, token: &str) -> Result<Option<PassportInfo>>;
}

/// Identity provider reached over HTTP.
///
/// Issues `GET <endpoint>` with `Authorization: Bearer <token>` and expects a
/// `200` with a [`PassportInfo`] JSON body.
#[derive(Debug, Clone)]
pub struct HttpIdentityProvider {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpIdentityProvider {
    /// Create a provider for `endpoint` whose requests give up after `timeout`.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::IdentityProvider(format!("Failed to build client: {e}")))?;

        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }

    /// The configured endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    async fn resolve(&self, token: &str) -> Result<Option<PassportInfo>> {
        let response = self
            .client
            .get(&self.endpoint)
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            debug!(status = %status, "Identity provider rejected token");
            return Ok(None);
        }

        match response.json::<PassportInfo>().await {
            Ok(info) => Ok(Some(info)),
            Err(e) => {
                debug!(error = %e, "Identity provider returned an undecodable body");
                Ok(None)
            }
        }
    }
}
