use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("rider busy: {0}")]
    RiderBusy(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// A concurrent writer won the row. Engines either retry or map
    /// this to `InvalidState` before it reaches a caller.
    #[error("version conflict: {0}")]
    VersionConflict(String),

    #[error("downstream timeout: {0}")]
    DownstreamTimeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::RiderBusy(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            AppError::InvalidState(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::InvalidCoordinate(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::VersionConflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::DownstreamTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "success": false,
            "error": message
        }));

        (status, body).into_response()
    }
}
