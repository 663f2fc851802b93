use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::catalog::CatalogError;
use crate::services::orchestrator::JobError;

pub mod database;
pub mod datasets;
pub mod health;
pub mod jobs;
pub mod metrics;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error returned by API handlers, rendered as `{"error": ...}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        let status = match &e {
            JobError::NotFound(_) => StatusCode::NOT_FOUND,
            JobError::AlreadyRunning { .. } | JobError::AlreadyFinished(_) => StatusCode::CONFLICT,
            JobError::InvalidTarget { .. } | JobError::Plan(_) => StatusCode::BAD_REQUEST,
            JobError::Store(_) | JobError::Queue(_) => {
                tracing::error!(error = %e, "Job backend error");
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        Self::new(status, e.to_string())
    }
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        tracing::warn!(error = %e, "Catalog listing failed");
        Self::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        tracing::error!(error = %e, "Database query failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Database error")
    }
}
