//! # Webhook Signature Verification
//!
//! Verifies Slack v0 request signatures using HMAC-SHA256 with constant-time
//! comparison and a bounded replay window.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::{HeaderMap, StatusCode};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-slack-signature";
pub const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
const SIGNATURE_VERSION: &str = "v0";

/// Errors that can occur during webhook signature verification
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("Missing required signature header: {header}")]
    MissingSignature { header: String },

    #[error("Invalid signature format: {header}")]
    InvalidSignatureFormat { header: String },

    #[error("Signature verification failed")]
    VerificationFailed,

    #[error("Missing required timestamp header: {header}")]
    MissingTimestamp { header: String },

    #[error("Invalid timestamp format: {header}")]
    InvalidTimestamp { header: String },

    #[error("Timestamp too old: {seconds}s old, max allowed: {max_seconds}s")]
    TimestampTooOld { seconds: u64, max_seconds: u64 },

    #[error("Timestamp too far in future: {seconds}s in future, max allowed: {max_seconds}s")]
    TimestampTooFuture { seconds: u64, max_seconds: u64 },
}

impl VerificationError {
    /// True when the request could not even be set up for verification
    /// (headers absent or unparseable), as opposed to a failed check.
    pub fn is_malformed_request(&self) -> bool {
        matches!(
            self,
            VerificationError::MissingSignature { .. }
                | VerificationError::InvalidSignatureFormat { .. }
                | VerificationError::MissingTimestamp { .. }
                | VerificationError::InvalidTimestamp { .. }
        )
    }

    /// Returns the appropriate HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        if self.is_malformed_request() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::UNAUTHORIZED
        }
    }
}

/// Result type for webhook verification
pub type VerificationResult<T> = Result<T, VerificationError>;

/// Verifies signed Slack requests against a pre-shared signing secret.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: String,
    tolerance_seconds: u64,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &"[REDACTED]")
            .field("tolerance_seconds", &self.tolerance_seconds)
            .finish()
    }
}

impl SignatureVerifier {
    pub fn new(secret: impl Into<String>, tolerance_seconds: u64) -> Self {
        Self {
            secret: secret.into(),
            tolerance_seconds,
        }
    }

    /// Verifies the request headers and raw body.
    pub fn verify(&self, headers: &HeaderMap, body: &[u8]) -> VerificationResult<()> {
        let signature_header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("");
        let timestamp_header = headers
            .get(TIMESTAMP_HEADER)
            .and_then(|h| h.to_str().ok())
            .unwrap_or("");

        self.verify_at(body, signature_header, timestamp_header, unix_now()?)
    }

    /// Verifies against an explicit clock reading.
    pub fn verify_at(
        &self,
        body: &[u8],
        signature_header: &str,
        timestamp_header: &str,
        now: u64,
    ) -> VerificationResult<()> {
        debug!(
            body_size = body.len(),
            tolerance_seconds = self.tolerance_seconds,
            "Starting Slack signature verification"
        );

        if signature_header.is_empty() {
            return Err(VerificationError::MissingSignature {
                header: "X-Slack-Signature".to_string(),
            });
        }

        if timestamp_header.is_empty() {
            return Err(VerificationError::MissingTimestamp {
                header: "X-Slack-Request-Timestamp".to_string(),
            });
        }

        let timestamp =
            timestamp_header
                .parse::<u64>()
                .map_err(|_| VerificationError::InvalidTimestamp {
                    header: "X-Slack-Request-Timestamp must be a valid Unix timestamp".to_string(),
                })?;

        let Some(provided_hex) = signature_header.strip_prefix("v0=") else {
            return Err(VerificationError::InvalidSignatureFormat {
                header: "X-Slack-Signature must start with 'v0='".to_string(),
            });
        };

        let provided_bytes =
            hex::decode(provided_hex).map_err(|_| VerificationError::InvalidSignatureFormat {
                header: "X-Slack-Signature contains invalid hex".to_string(),
            })?;

        let time_diff = now.abs_diff(timestamp);
        if time_diff > self.tolerance_seconds {
            return Err(if now > timestamp {
                VerificationError::TimestampTooOld {
                    seconds: time_diff,
                    max_seconds: self.tolerance_seconds,
                }
            } else {
                VerificationError::TimestampTooFuture {
                    seconds: time_diff,
                    max_seconds: self.tolerance_seconds,
                }
            });
        }

        let expected = self.compute(timestamp_header, body)?;
        if subtle::ConstantTimeEq::ct_eq(expected.as_slice(), &provided_bytes[..]).into() {
            Ok(())
        } else {
            Err(VerificationError::VerificationFailed)
        }
    }

    /// Produces the `X-Slack-Signature` header value for a body signed at `timestamp`.
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> VerificationResult<String> {
        Ok(format!(
            "{}={}",
            SIGNATURE_VERSION,
            hex::encode(self.compute(timestamp, body)?)
        ))
    }

    // Base string is "v0:{timestamp}:{body}" over the raw body bytes.
    fn compute(&self, timestamp: &str, body: &[u8]) -> VerificationResult<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| VerificationError::VerificationFailed)?;
        mac.update(SIGNATURE_VERSION.as_bytes());
        mac.update(b":");
        mac.update(timestamp.as_bytes());
        mac.update(b":");
        mac.update(body);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

fn unix_now() -> VerificationResult<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| VerificationError::InvalidTimestamp {
            header: "Failed to get current time".to_string(),
        })
}
