//! API error handling.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::services::{GitError, IngestError};

/// API error type.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<pagecast_core::Error> for ApiError {
    fn from(err: pagecast_core::Error) -> Self {
        match err {
            pagecast_core::Error::NotFound(msg) => ApiError::NotFound(msg),
            pagecast_core::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Git(GitError::InvalidUrl(msg)) => ApiError::BadRequest(msg),
            IngestError::Git(GitError::CloneFailed(msg)) => {
                ApiError::BadRequest(format!("clone failed: {}", msg))
            }
            IngestError::Store(e) => e.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
