use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Common error types used across the application.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Retryable failure talking to the release API.
    #[error("Release source error: {0}")]
    Transient(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Notification service not initialized")]
    NotInitialized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether the next trigger may retry the failed operation as-is.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::Transient(_) | AppError::Http(_) | AppError::Storage(_) | AppError::Redis(_)
        )
    }
}

/// Per-recipient send failure reported by a delivery transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The platform reported that this recipient cannot be messaged.
    /// Retrying is pointless; the recipient gets opted out.
    #[error("recipient unreachable: {0}")]
    Unreachable(String),

    #[error("transient delivery failure: {0}")]
    Transient(String),
}

impl DeliveryError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, DeliveryError::Unreachable(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::NotInitialized => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            AppError::Transient(_) | AppError::Http(_) => (StatusCode::BAD_GATEWAY, self.to_string()),
            AppError::Config(_)
            | AppError::Storage(_)
            | AppError::Redis(_)
            | AppError::Serialization(_)
            | AppError::Delivery(_)
            | AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
