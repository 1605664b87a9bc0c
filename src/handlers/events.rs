//! # Events Endpoint
//!
//! Ingress for Slack Events API callbacks. Requests are authenticated with the
//! Slack v0 signature before the body is decoded.

use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use crate::error::{ApiError, ErrorType};
use crate::slack::events::InboundEnvelope;
use crate::server::AppState;
use crate::telemetry::{TraceContext, with_trace_context};

/// Upper bound on accepted callback bodies.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Receive a Slack Events API callback
///
/// Answers the `url_verification` handshake with the challenge token and
/// dispatches `event_callback` payloads. Dispatch failures are logged and the
/// request is still acknowledged with 200 so Slack does not redeliver.
#[utoipa::path(
    post,
    path = "/events-endpoint",
    params(
        ("X-Slack-Signature" = String, Header, description = "v0=<hex HMAC-SHA256>"),
        ("X-Slack-Request-Timestamp" = String, Header, description = "Unix seconds the request was signed at")
    ),
    request_body(content = JsonValue, description = "Slack Events API envelope", content_type = "application/json"),
    responses(
        (status = 200, description = "Event accepted, or challenge echoed as plain text"),
        (status = 400, description = "Unreadable body or missing signature headers", body = ApiError),
        (status = 401, description = "Signature mismatch or stale timestamp", body = ApiError),
        (status = 500, description = "Envelope could not be decoded", body = ApiError)
    ),
    tag = "events"
)]
pub async fn events_endpoint(State(state): State<AppState>, req: Request) -> Response {
    with_trace_context(TraceContext::generate(), async move {
        match handle_event_request(state, req).await {
            Ok(response) => response,
            Err(err) => err.into_response(),
        }
    })
    .await
}

async fn handle_event_request(state: AppState, req: Request) -> Result<Response, ApiError> {
    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to read request body");
            ErrorType::BadRequest.with_message("Failed to read request body")
        })?;

    verify_request(&state, &parts.headers, &body)?;

    let envelope: InboundEnvelope = serde_json::from_slice(&body)?;
    match envelope {
        InboundEnvelope::UrlVerification { challenge } => {
            debug!("Answering url_verification challenge");
            Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text"))],
                challenge,
            )
                .into_response())
        }
        InboundEnvelope::EventCallback { event } => {
            let event_type = event.event_type();
            info!(event_type = %event_type, "Received event callback");

            match state.dispatcher.dispatch(&event).await {
                Ok(outcome) => debug!(event_type = %event_type, ?outcome, "Event dispatched"),
                Err(err) => error!(
                    event_type = %event_type,
                    kind = err.kind(),
                    persisted_rows = err.persisted_rows(),
                    partial = err.is_partial(),
                    error = %err,
                    "Event dispatch failed"
                ),
            }
            Ok(StatusCode::OK.into_response())
        }
        InboundEnvelope::Unknown => {
            debug!("Ignoring unrecognized envelope type");
            Ok(StatusCode::OK.into_response())
        }
    }
}

fn verify_request(state: &AppState, headers: &HeaderMap, body: &Bytes) -> Result<(), ApiError> {
    state.verifier.verify(headers, body).map_err(|e| {
        warn!(error = %e, "Rejected events request");
        ApiError::from(e)
    })
}
