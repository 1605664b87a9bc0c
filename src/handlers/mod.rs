//! # API Handlers
//!
//! HTTP endpoint handlers for the Slack event receiver.

pub mod events;

use axum::http::StatusCode;

/// Liveness probe
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service is up (empty body)")
    ),
    tag = "root"
)]
pub async fn root() -> StatusCode {
    StatusCode::OK
}
