//! API Error Types
//!
//! Maps broker, lookup and handshake failures to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::lookup::LookupError;
use crate::stream::BrokerError;
use crate::websocket::HandshakeError;

/// API error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// Request validation failed
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request conflicts with server configuration
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Resource lookup failed
    #[error(transparent)]
    Lookup(#[from] LookupError),

    /// WebSocket upgrade request was malformed
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// Publish rejected by the broker
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
    pub request_id: String,
}

/// Error details
#[derive(Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::Lookup(LookupError::NotFound(_)) => (StatusCode::NOT_FOUND, "TOPIC_NOT_FOUND"),
            ApiError::Lookup(LookupError::Unavailable(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "LOOKUP_FAILED")
            }
            ApiError::Handshake(_) => (StatusCode::BAD_REQUEST, "HANDSHAKE_ERROR"),
            ApiError::Broker(BrokerError::Serialization(_)) => {
                (StatusCode::BAD_REQUEST, "SERIALIZATION_ERROR")
            }
            ApiError::Broker(BrokerError::Stopped) => {
                (StatusCode::SERVICE_UNAVAILABLE, "BROKER_STOPPED")
            }
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ApiError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let request_id = uuid::Uuid::new_v4().to_string();

        if status.is_server_error() {
            tracing::error!(
                request_id = %request_id,
                error_code = %code,
                error_message = %self,
                "API error occurred"
            );
        } else {
            tracing::debug!(
                request_id = %request_id,
                error_code = %code,
                error_message = %self,
                "Request rejected"
            );
        }

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: self.to_string(),
            },
            request_id,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API operations
pub type ApiResult<T> = Result<T, ApiError>;
