//! Error types for decoding protocol values.

use thiserror::Error;

/// Errors raised while parsing or decoding wire values.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A resource path did not have the expected `projects/<p>/<kind>/<name>` shape.
    #[error("invalid {kind} path: {path}")]
    InvalidPath { kind: &'static str, path: String },

    /// Message data was not valid base64.
    #[error("message data is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// A JSON payload could not be decoded.
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}
