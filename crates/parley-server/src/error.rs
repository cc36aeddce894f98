use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use parley_shared::{AuthError, ProtocolError};
use parley_store::StoreError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Access denied")]
    AccessDenied,

    #[error("{0}")]
    InvalidMessage(String),

    #[error("Message too long: {len} characters (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("{0} not found")]
    NotFound(String),

    #[error("Not authorized: {0}")]
    Unauthenticated(String),

    #[error("Storage unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Upload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },
}

impl From<StoreError> for ServerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ServerError::NotFound("Record".into()),
            StoreError::Constraint(msg) => ServerError::BadRequest(msg),
            other => ServerError::UpstreamUnavailable(other.to_string()),
        }
    }
}

impl From<ProtocolError> for ServerError {
    fn from(e: ProtocolError) -> Self {
        match e {
            ProtocolError::TooLong { len, max } => ServerError::TooLong { len, max },
            ProtocolError::EmptyMessage => ServerError::InvalidMessage(e.to_string()),
            ProtocolError::Serialization(_) => ServerError::BadRequest(e.to_string()),
        }
    }
}

impl From<AuthError> for ServerError {
    fn from(e: AuthError) -> Self {
        ServerError::Unauthenticated(e.to_string())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::AccessDenied => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::InvalidMessage(_) | ServerError::TooLong { .. } => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            ServerError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::UpstreamUnavailable(detail) => {
                tracing::error!(error = %detail, "storage failure");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Storage unavailable".to_string(),
                )
            }
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::PayloadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, self.to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
