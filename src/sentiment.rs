//! Sentiment classification over the Cloud Natural Language REST API.
//!
//! Used only as best-effort enrichment: callers log failures and move on.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::credentials::{CredentialsError, TokenProvider};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SentimentScore {
    /// Polarity in [-1.0, 1.0].
    pub score: f32,
    /// Overall strength of emotion, >= 0.
    pub magnitude: f32,
}

#[derive(Debug, Error)]
pub enum SentimentError {
    #[error("network error calling sentiment service: {0}")]
    Network(#[from] reqwest::Error),

    #[error("sentiment service returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("malformed sentiment response: {0}")]
    MalformedResponse(String),

    #[error("no usable sentiment credentials: {0}")]
    Credentials(#[from] CredentialsError),

    #[error("sentiment request timed out")]
    Timeout,
}

/// Document-level sentiment analysis.
#[async_trait]
pub trait SentimentClassifier: Send + Sync {
    async fn analyze(&self, text: &str) -> Result<SentimentScore, SentimentError>;
}

/// Client for `documents:analyzeSentiment`. An API key, when set, is used
/// instead of a bearer token.
#[derive(Clone)]
pub struct LanguageClient {
    http: reqwest::Client,
    api_base: String,
    api_key: Option<String>,
    credentials: Option<Arc<dyn TokenProvider>>,
}

impl std::fmt::Debug for LanguageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeSentimentRequest<'a> {
    document: Document<'a>,
    encoding_type: &'static str,
}

#[derive(Debug, Serialize)]
struct Document<'a> {
    #[serde(rename = "type")]
    doc_type: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeSentimentResponse {
    document_sentiment: Option<DocumentSentiment>,
}

#[derive(Debug, Deserialize)]
struct DocumentSentiment {
    #[serde(default)]
    score: f32,
    #[serde(default)]
    magnitude: f32,
}

impl LanguageClient {
    pub fn new(
        http: reqwest::Client,
        api_base: impl Into<String>,
        api_key: Option<String>,
        credentials: Option<Arc<dyn TokenProvider>>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            credentials,
        }
    }
}

#[async_trait]
impl SentimentClassifier for LanguageClient {
    async fn analyze(&self, text: &str) -> Result<SentimentScore, SentimentError> {
        let mut request = self
            .http
            .post(format!("{}/documents:analyzeSentiment", self.api_base))
            .json(&AnalyzeSentimentRequest {
                document: Document {
                    doc_type: "PLAIN_TEXT",
                    content: text,
                },
                encoding_type: "UTF8",
            });
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key)]);
        } else if let Some(credentials) = &self.credentials {
            request = request.bearer_auth(credentials.access_token().await?);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SentimentError::HttpStatus {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let parsed: AnalyzeSentimentResponse = response
            .json()
            .await
            .map_err(|e| SentimentError::MalformedResponse(e.to_string()))?;
        let sentiment = parsed.document_sentiment.ok_or_else(|| {
            SentimentError::MalformedResponse("missing documentSentiment".to_string())
        })?;

        Ok(SentimentScore {
            score: sentiment.score.clamp(-1.0, 1.0),
            magnitude: sentiment.magnitude.max(0.0),
        })
    }
}
