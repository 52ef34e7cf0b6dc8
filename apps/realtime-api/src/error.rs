use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Structured API error returned to HTTP clients.
#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

/// Application-level error type.
///
/// Returned by the data-layer collaborators as well as the HTTP handlers; the realtime
/// path never forwards its message to a socket client.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "UNAVAILABLE".to_string(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: ApiErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<diesel::result::Error> for ApiError {
    fn from(err: diesel::result::Error) -> Self {
        tracing::error!(?err, "database error");
        Self::internal("An internal error occurred")
    }
}

impl From<diesel_async::pooled_connection::deadpool::PoolError> for ApiError {
    fn from(err: diesel_async::pooled_connection::deadpool::PoolError) -> Self {
        tracing::error!(?err, "pool error");
        Self::unavailable("Database unavailable")
    }
}

/// A realtime command failure, reported to the client as `{ success: false, message }`.
///
/// Messages are deliberately generic: none of them reveals whether a private entity
/// exists.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("Malformed command: {0}")]
    Malformed(String),
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Unknown room kind: {0}")]
    UnknownRoomKind(String),
    #[error("Invalid room: {0}")]
    InvalidRoom(String),
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token is not active")]
    InactiveToken,
    #[error("Token is not allowed from this address or origin")]
    RestrictedToken,
    #[error("Insufficient scope")]
    InsufficientScope,
    #[error("Access denied")]
    Forbidden,
    #[error("Authentication timed out")]
    Timeout,
    #[error("Service temporarily unavailable")]
    Unavailable,
}

/// Failure talking to the pub/sub bus.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
}
