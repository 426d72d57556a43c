//! One error enum for the whole crate, mapped to HTTP status at the
//! boundary. Internal pipeline code propagates `anyhow::Result` and attaches
//! context; conversion into `RagError` happens only where a response is
//! produced.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("vector database error: {0}")]
    VectorDb(#[from] anyhow::Error),

    #[error("embedding service error: {0}")]
    Embedding(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    details: Option<String>,
}

impl IntoResponse for RagError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            RagError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            RagError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            RagError::JobNotFound(_) => (StatusCode::NOT_FOUND, self.to_string()),
            RagError::VectorDb(_) => (StatusCode::INTERNAL_SERVER_ERROR, "vector database error, please try again".to_string()),
            RagError::Embedding(_) => (StatusCode::INTERNAL_SERVER_ERROR, "embedding service error, please try again".to_string()),
            RagError::Generation(_) => (StatusCode::INTERNAL_SERVER_ERROR, "generation failed".to_string()),
            RagError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string()),
        };

        let details = if matches!(self, RagError::BadRequest(_) | RagError::JobNotFound(_)) {
            None
        } else {
            Some(self.to_string())
        };

        let body = ErrorBody {
            success: false,
            error: message,
            details,
        };

        (status, Json(body)).into_response()
    }
}
