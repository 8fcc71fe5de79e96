//! Server-level error type, wrapping the core's and storage's errors for
//! the (minimal) admin/health surface (grounded on the teacher's
//! `core::error::Error` / `IntoResponse` pattern).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use convergence_core::error::CoreError;
use convergence_core::persistence::PersistenceError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("model coordinator error: {0}")]
    Core(#[from] CoreError),

    #[error("storage error: {0}")]
    Storage(#[from] PersistenceError),

    #[error("the coordinator for this model is no longer running")]
    CoordinatorGone,

    #[error("model not found")]
    ModelNotFound,

    #[error("bad request: {0}")]
    BadRequest(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServerError::ModelNotFound => StatusCode::NOT_FOUND,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::CoordinatorGone => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Core(_) | ServerError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": { "message": self.to_string() } }));
        (status, body).into_response()
    }
}
