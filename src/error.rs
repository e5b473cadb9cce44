use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("invalid ride state: {0}")]
    InvalidState(String),

    #[error("store failure: {0}")]
    Store(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn ride_not_found(id: impl std::fmt::Display) -> Self {
        AppError::NotFound(format!("ride {id} not found"))
    }

    pub fn driver_not_found(id: impl std::fmt::Display) -> Self {
        AppError::NotFound(format!("driver {id} not found"))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::InvalidState(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Store(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
