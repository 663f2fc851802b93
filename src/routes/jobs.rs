use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{JobCreatedResponse, JobRequest, JobStatusResponse};
use crate::routes::ApiError;

/// POST /api/v1/jobs: start a download, import or validate job.
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<JobRequest>,
) -> Result<(StatusCode, Json<JobCreatedResponse>), ApiError> {
    request
        .validate()
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;

    let job = state
        .orchestrator
        .enqueue(request.kind, request.date.as_deref(), request.options)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(JobCreatedResponse {
            job_id: job.id,
            status: job.state,
            message: format!("{} job for {} queued", job.kind, job.target),
        }),
    ))
}

/// GET /api/v1/jobs/{job_id}: poll a job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    Ok(Json(state.orchestrator.get_status(job_id).await?))
}

/// POST /api/v1/jobs/{job_id}/cancel: request cancellation.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<(StatusCode, Json<JobStatusResponse>), ApiError> {
    let status = state.orchestrator.cancel(job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(status)))
}
