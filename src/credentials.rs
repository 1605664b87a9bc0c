//! Google Cloud access tokens for the warehouse and sentiment clients.
//!
//! Tokens come either from a fixed `GOOGLE_OAUTH_ACCESS_TOKEN` or from the
//! GCE metadata server, which hands out short-lived tokens for the attached
//! service account. Metadata tokens are cached and refetched shortly before
//! they expire.

use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Refetch once a cached token has less than this left.
const REFRESH_LEAD_TIME: Duration = Duration::from_secs(60);

const METADATA_TOKEN_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("network error fetching access token: {0}")]
    Network(#[from] reqwest::Error),

    #[error("metadata server returned HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("malformed token response: {0}")]
    MalformedResponse(String),
}

/// Source of bearer tokens for Google APIs.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, CredentialsError>;
}

/// A token supplied out of band. Never refreshed.
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticToken").finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String, CredentialsError> {
        Ok(self.token.clone())
    }
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Service-account tokens from the GCE metadata server.
pub struct MetadataServerToken {
    http: reqwest::Client,
    base_url: String,
    cached: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for MetadataServerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataServerToken")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl MetadataServerToken {
    /// `host` is a bare host (and optional port), as in `GCE_METADATA_HOST`.
    pub fn new(http: reqwest::Client, host: &str) -> Self {
        Self {
            http,
            base_url: format!("http://{}", host.trim_end_matches('/')),
            cached: Mutex::new(None),
        }
    }

    async fn fetch(&self) -> Result<CachedToken, CredentialsError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, METADATA_TOKEN_PATH))
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CredentialsError::HttpStatus {
                status: status.as_u16(),
            });
        }

        let parsed: MetadataTokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialsError::MalformedResponse(e.to_string()))?;
        if parsed.access_token.is_empty() {
            return Err(CredentialsError::MalformedResponse(
                "empty access_token".to_string(),
            ));
        }

        debug!(expires_in = parsed.expires_in, "Fetched metadata server token");
        Ok(CachedToken {
            value: parsed.access_token,
            expires_at: Instant::now() + Duration::from_secs(parsed.expires_in),
        })
    }
}

#[async_trait]
impl TokenProvider for MetadataServerToken {
    async fn access_token(&self) -> Result<String, CredentialsError> {
        // Held across the fetch so concurrent requests share one refresh.
        let mut cached = self.cached.lock().await;
        let fresh_until = Instant::now() + REFRESH_LEAD_TIME;
        if let Some(token) = cached.as_ref().filter(|t| t.expires_at > fresh_until) {
            return Ok(token.value.clone());
        }

        match self.fetch().await {
            Ok(token) => {
                let value = token.value.clone();
                *cached = Some(token);
                Ok(value)
            }
            Err(err) => {
                counter!("gcp_token_fetch_failures_total").increment(1);
                warn!(error = %err, "Failed to fetch access token from metadata server");
                Err(err)
            }
        }
    }
}
