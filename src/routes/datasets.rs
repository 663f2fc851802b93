use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::NaiveDate;

use crate::app_state::AppState;
use crate::models::api::DatasetsResponse;
use crate::models::snapshot::Snapshot;
use crate::routes::ApiError;

/// GET /api/v1/datasets: published snapshots, newest first.
pub async fn list_datasets(State(state): State<AppState>) -> Result<Json<DatasetsResponse>, ApiError> {
    let snapshots = state.catalog.list_snapshots().await?;
    Ok(Json(DatasetsResponse {
        dates: snapshots.iter().map(|s| s.date).collect(),
        snapshots,
    }))
}

/// GET /api/v1/datasets/{date}: the relevant files of one snapshot.
pub async fn get_dataset(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<Snapshot>, ApiError> {
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid date {date:?}: {e}")))?;

    let snapshot = state.catalog.snapshot(date).await?;
    if snapshot.files.is_empty() {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("No snapshot published for {date}"),
        ));
    }
    Ok(Json(snapshot))
}
