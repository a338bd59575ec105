//! Error types for the HTTP service

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use queue_runtime::QueueError;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::ToSchema;

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;

/// Generic message returned to clients when publishing fails
pub const PUBLISH_FAILED_MESSAGE: &str = "Failed to send message";

/// JSON body of every error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Client-facing description of the failure
    pub error: String,

    /// HTTP status code, repeated from the response
    pub status: u16,

    /// RFC 3339 time the error was produced
    pub timestamp: String,
}

/// Send handler errors with HTTP status code mapping
///
/// - `400 Bad Request`: no message could be read from the request
/// - `500 Internal Server Error`: the broker did not accept the message
///
/// Publish failures are not differentiated for the client. The cause is
/// logged server-side against the request's correlation ID and the response
/// body carries a fixed message.
#[derive(Debug, thiserror::Error)]
pub enum SendMessageError {
    /// No query parameter and no body
    ///
    /// Maps to: `400 Bad Request`
    #[error("A message must be supplied as the 'message' query parameter or as the request body")]
    MissingMessage,

    /// Body present but unreadable (malformed JSON, not UTF-8)
    ///
    /// Maps to: `400 Bad Request`
    #[error("Invalid request body: {message}")]
    InvalidBody { message: String },

    /// Broker call failed
    ///
    /// Maps to: `500 Internal Server Error`, never retried
    #[error("Failed to publish message: {0}")]
    PublishFailed(#[from] QueueError),
}

impl SendMessageError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingMessage | Self::InvalidBody { .. } => StatusCode::BAD_REQUEST,
            Self::PublishFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SendMessageError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match &self {
            Self::MissingMessage | Self::InvalidBody { .. } => {
                warn!(error = %self, "Rejected send request");
                self.to_string()
            }
            Self::PublishFailed(e) => {
                // Details stay in the log, the client gets a generic message
                error!(
                    error = %e,
                    error_kind = e.kind(),
                    transient = e.is_transient(),
                    "Failed to send message"
                );
                PUBLISH_FAILED_MESSAGE.to_string()
            }
        };

        let body = ErrorResponse {
            error: message,
            status: status.as_u16(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

/// Service-level errors
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Failed to bind to address {address}: {message}")]
    BindFailed { address: String, message: String },

    #[error("Server failed: {message}")]
    ServerFailed { message: String },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

impl ServiceError {
    /// Process exit code reported by the service binary
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BindFailed { .. } => 1,
            Self::ServerFailed { .. } => 2,
            Self::Configuration(_) => 3,
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration loading failed: {0}")]
    Loading(#[from] config::ConfigError),
}
