//! Record sink: append-only event rows in a BigQuery table.
//!
//! Each row is its own `tabledata.insertAll` request. No `insertId` is sent,
//! so delivery is at-least-once and duplicates are possible if a caller
//! resubmits.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

use crate::credentials::{CredentialsError, TokenProvider};

/// Civil DATETIME layout accepted by BigQuery streaming inserts.
const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// One persisted record. `datetime` is capture time, not event time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WarehouseRow {
    #[serde(serialize_with = "serialize_civil_datetime")]
    pub datetime: NaiveDateTime,
    pub event: String,
    pub user: String,
    pub channel: String,
    pub reaction: String,
}

impl WarehouseRow {
    /// Builds a row stamped with the current time.
    pub fn captured_now(
        event: impl Into<String>,
        user: impl Into<String>,
        channel: impl Into<String>,
        reaction: impl Into<String>,
    ) -> Self {
        Self {
            datetime: Utc::now().naive_utc(),
            event: event.into(),
            user: user.into(),
            channel: channel.into(),
            reaction: reaction.into(),
        }
    }
}

fn serialize_civil_datetime<S: Serializer>(
    value: &NaiveDateTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&value.format(DATETIME_FORMAT).to_string())
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("network error appending row: {0}")]
    Network(#[from] reqwest::Error),

    #[error("warehouse returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("malformed warehouse response: {0}")]
    MalformedResponse(String),

    #[error("warehouse rejected row: {0}")]
    Rejected(String),

    #[error("no usable warehouse credentials: {0}")]
    Credentials(#[from] CredentialsError),

    #[error("append timed out")]
    Timeout,
}

/// Appends one row per call. No read path.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn append(&self, row: &WarehouseRow) -> Result<(), SinkError>;
}

/// Fully qualified table a [`BigQuerySink`] writes to.
#[derive(Debug, Clone)]
pub struct TableRef {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

#[derive(Clone)]
pub struct BigQuerySink {
    http: reqwest::Client,
    api_base: String,
    table: TableRef,
    credentials: Arc<dyn TokenProvider>,
}

impl std::fmt::Debug for BigQuerySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BigQuerySink")
            .field("api_base", &self.api_base)
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<InsertError>,
}

#[derive(Debug, Deserialize)]
struct InsertError {
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

impl BigQuerySink {
    pub fn new(
        http: reqwest::Client,
        api_base: impl Into<String>,
        table: TableRef,
        credentials: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            table,
            credentials,
        }
    }

    fn insert_all_url(&self) -> String {
        format!(
            "{}/projects/{}/datasets/{}/tables/{}/insertAll",
            self.api_base, self.table.project_id, self.table.dataset_id, self.table.table_id
        )
    }
}

#[async_trait]
impl RecordSink for BigQuerySink {
    async fn append(&self, row: &WarehouseRow) -> Result<(), SinkError> {
        let token = self.credentials.access_token().await?;
        let response = self
            .http
            .post(self.insert_all_url())
            .bearer_auth(token)
            .json(&json!({ "rows": [{ "json": row }] }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SinkError::HttpStatus {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let parsed: InsertAllResponse = response
            .json()
            .await
            .map_err(|e| SinkError::MalformedResponse(e.to_string()))?;
        if let Some(first) = parsed.insert_errors.first() {
            let details = first
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.reason, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SinkError::Rejected(details));
        }

        debug!(event = %row.event, channel = %row.channel, "Appended warehouse row");
        Ok(())
    }
}
