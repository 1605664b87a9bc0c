//! Slack Web API client.
//!
//! Covers the three calls the receiver makes: `users.info`,
//! `conversations.info` and `chat.postMessage`.

pub mod events;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::debug;

/// Errors returned by the chat platform client.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("network error calling {method}: {source}")]
    Network {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} returned HTTP {status}")]
    HttpStatus { method: &'static str, status: u16 },

    #[error("{method} failed: {error}")]
    Api { method: &'static str, error: String },

    #[error("malformed {method} response: {details}")]
    MalformedResponse {
        method: &'static str,
        details: String,
    },
}

/// Subset of a Slack user object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SlackUser {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub real_name: Option<String>,
}

/// Subset of a Slack conversation object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SlackChannel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub locale: Option<String>,
}

/// Outbound operations against the chat platform.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Posts a plain-text message to a channel.
    async fn post_message(&self, channel: &str, text: &str) -> Result<(), ChatError>;

    /// Looks up a user by ID.
    async fn user_info(&self, user_id: &str) -> Result<SlackUser, ChatError>;

    /// Looks up a conversation by ID.
    async fn conversation_info(
        &self,
        channel_id: &str,
        include_locale: bool,
    ) -> Result<SlackChannel, ChatError>;
}

/// Slack Web API client authenticated with a bot OAuth token.
#[derive(Clone)]
pub struct SlackClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl std::fmt::Debug for SlackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
}

impl SlackClient {
    pub fn new(http: reqwest::Client, api_base: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base, method)
    }

    async fn read_envelope(
        method: &'static str,
        response: reqwest::Response,
    ) -> Result<ApiEnvelope, ChatError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::HttpStatus {
                method,
                status: status.as_u16(),
            });
        }

        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| ChatError::MalformedResponse {
                method,
                details: e.to_string(),
            })?;

        if !envelope.ok {
            return Err(ChatError::Api {
                method,
                error: envelope.error.unwrap_or_else(|| "unknown_error".to_string()),
            });
        }

        Ok(envelope)
    }

    fn extract<T: DeserializeOwned>(
        method: &'static str,
        mut envelope: ApiEnvelope,
        field: &str,
    ) -> Result<T, ChatError> {
        let value = envelope
            .rest
            .remove(field)
            .ok_or_else(|| ChatError::MalformedResponse {
                method,
                details: format!("missing '{}' field", field),
            })?;
        serde_json::from_value(value).map_err(|e| ChatError::MalformedResponse {
            method,
            details: e.to_string(),
        })
    }
}

#[async_trait]
impl ChatClient for SlackClient {
    async fn post_message(&self, channel: &str, text: &str) -> Result<(), ChatError> {
        const METHOD: &str = "chat.postMessage";
        debug!(channel = %channel, "Posting Slack message");

        let response = self
            .http
            .post(self.url(METHOD))
            .bearer_auth(&self.token)
            .json(&PostMessageRequest { channel, text })
            .send()
            .await
            .map_err(|source| ChatError::Network {
                method: METHOD,
                source,
            })?;

        Self::read_envelope(METHOD, response).await.map(|_| ())
    }

    async fn user_info(&self, user_id: &str) -> Result<SlackUser, ChatError> {
        const METHOD: &str = "users.info";

        let response = self
            .http
            .get(self.url(METHOD))
            .bearer_auth(&self.token)
            .query(&[("user", user_id)])
            .send()
            .await
            .map_err(|source| ChatError::Network {
                method: METHOD,
                source,
            })?;

        let envelope = Self::read_envelope(METHOD, response).await?;
        Self::extract(METHOD, envelope, "user")
    }

    async fn conversation_info(
        &self,
        channel_id: &str,
        include_locale: bool,
    ) -> Result<SlackChannel, ChatError> {
        const METHOD: &str = "conversations.info";

        let response = self
            .http
            .get(self.url(METHOD))
            .bearer_auth(&self.token)
            .query(&[
                ("channel", channel_id),
                ("include_locale", if include_locale { "true" } else { "false" }),
            ])
            .send()
            .await
            .map_err(|source| ChatError::Network {
                method: METHOD,
                source,
            })?;

        let envelope = Self::read_envelope(METHOD, response).await?;
        Self::extract(METHOD, envelope, "channel")
    }
}
