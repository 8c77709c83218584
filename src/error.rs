// src/error.rs

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// Global Application Error Enum.
/// Centralizes error handling and mapping to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    // 500 Internal Server Error
    InternalServerError(String),

    // 400 Bad Request (bad option index, question not in the frozen set)
    BadRequest(String),

    // 401 Unauthorized
    AuthError(String),

    // 403 Forbidden (session ownership mismatch)
    Forbidden(String),

    // 404 Not Found (unknown session/question)
    NotFound(String),

    // 409 Conflict (mutating a finished session). The duplicate-open-session
    // case carries the existing session id so the client can resume it.
    Conflict(String),
    DuplicateOpenSession { session_id: i64 },

    // 410 Gone: time budget or deadline exhausted. Kept apart from Conflict
    // so callers can render a clear "time's up" state.
    Expired(String),

    // 422 Unprocessable: not enough published questions to build the
    // requested session.
    InsufficientInventory(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for AppError {}

/// Implements `IntoResponse` for `AppError`.
/// Converts the error into a JSON response with appropriate HTTP status code
/// and a stable machine-readable `code`.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error_message) = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal Server Error".to_string(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            AppError::AuthError(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            AppError::DuplicateOpenSession { session_id } => {
                let body = Json(json!({
                    "error": "An open session already exists for this test",
                    "code": "duplicate_open_session",
                    "session_id": session_id,
                }));
                return (StatusCode::CONFLICT, body).into_response();
            }
            AppError::Expired(msg) => (StatusCode::GONE, "expired", msg),
            AppError::InsufficientInventory(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "insufficient_inventory",
                msg,
            ),
        };
        let body = Json(json!({
            "error": error_message,
            "code": code,
        }));

        (status, body).into_response()
    }
}

/// Converts `sqlx::Error` into `AppError::InternalServerError`.
/// Allows using `?` operator on database queries.
impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(err.to_string())
    }
}
