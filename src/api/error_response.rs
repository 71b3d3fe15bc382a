//! Error responses of the HTTP service.
//!
//! Every failure is rendered as `{"error": {"code": ..., "message": ...}}`
//! with a matching status code.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query::QueryError;

/// Failures surfaced by route handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The body was not a valid query request.
    #[error("invalid request body: {0}")]
    InvalidRequest(String),

    /// The query failed parsing or validation.
    #[error(transparent)]
    InvalidQuery(#[from] QueryError),

    /// No job with this id.
    #[error("job {0} not found")]
    JobNotFound(u64),

    /// The job has not stored this document.
    #[error("document '{key}' not found in job {job_id}")]
    DocumentNotFound {
        /// Job id.
        job_id: u64,
        /// Requested document key.
        key: String,
    },

    /// The job already ended.
    #[error("job {0} has already finished")]
    JobFinished(u64),
}

impl ApiError {
    /// HTTP status for the error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            Self::JobNotFound(_) | Self::DocumentNotFound { .. } => StatusCode::NOT_FOUND,
            Self::JobFinished(_) => StatusCode::CONFLICT,
        }
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidQuery(_) => "invalid_query",
            Self::JobNotFound(_) => "job_not_found",
            Self::DocumentNotFound { .. } => "document_not_found",
            Self::JobFinished(_) => "job_finished",
        }
    }
}

/// JSON error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// The error details.
    pub error: ErrorDetail,
}

/// Code and message of an error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable code, e.g. `invalid_query`.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl From<&ApiError> for ErrorBody {
    fn from(error: &ApiError) -> Self {
        Self {
            error: ErrorDetail {
                code: error.error_code().to_string(),
                message: error.to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody::from(&self);
        (self.status_code(), Json(body)).into_response()
    }
}
