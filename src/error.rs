use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::time::Duration;
use thiserror::Error;

/// Detail returned to callers when a model reply cannot be decoded.
pub const UNPARSEABLE_REPLY_DETAIL: &str = "Failed to parse the graph data";

/// Main error type for kgrelay
#[derive(Error, Debug)]
pub enum RelayError {
    /// Caller-supplied graph state is not a strict JSON object
    #[error("Invalid graph JSON: {0}")]
    InvalidGraph(String),

    /// Missing or malformed request fields
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Request body exceeds the configured upload limit
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Generative model API errors
    #[error("Model API error: {message}")]
    Model {
        /// HTTP status returned by the model API, if the request got that far
        status: Option<u16>,
        message: String,
    },

    /// A model call did not complete within the configured timeout
    #[error("Model API call timed out after {0:?}")]
    Timeout(Duration),

    /// Model reply is not valid JSON after fence stripping
    #[error("Unparseable model reply: {0}")]
    UnparseableReply(String),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    pub fn model(status: Option<u16>, message: impl Into<String>) -> Self {
        RelayError::Model {
            status,
            message: message.into(),
        }
    }

    /// Whether a retry has a reasonable chance of succeeding.
    ///
    /// Timeouts, transport failures (no status) and HTTP 429/5xx are transient;
    /// everything else fails the request immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            RelayError::Timeout(_) => true,
            RelayError::Model { status: None, .. } => true,
            RelayError::Model {
                status: Some(code), ..
            } => *code == 429 || (500..=599).contains(code),
            _ => false,
        }
    }

    /// HTTP status this error maps to at the request boundary.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::InvalidGraph(_) | RelayError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RelayError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::Model { status: Some(_), .. } => StatusCode::BAD_GATEWAY,
            RelayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RelayError::Model { status: None, .. }
            | RelayError::UnparseableReply(_)
            | RelayError::Io(_)
            | RelayError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = match &self {
            RelayError::UnparseableReply(reason) => {
                log::warn!("Model reply could not be parsed: {}", reason);
                UNPARSEABLE_REPLY_DETAIL.to_string()
            }
            RelayError::InvalidGraph(_)
            | RelayError::InvalidInput(_)
            | RelayError::PayloadTooLarge(_) => {
                log::warn!("Rejected request: {}", self);
                self.to_string()
            }
            _ => {
                log::error!("Request failed: {}", self);
                self.to_string()
            }
        };

        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}

/// Convenient Result type using RelayError
pub type Result<T> = std::result::Result<T, RelayError>;
