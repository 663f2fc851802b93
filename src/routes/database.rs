use axum::extract::State;
use axum::Json;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::api::DatabaseStatusResponse;
use crate::routes::ApiError;

/// GET /api/v1/database/status: row counts of the people database tables.
pub async fn database_status(
    State(state): State<AppState>,
) -> Result<Json<DatabaseStatusResponse>, ApiError> {
    let tables = queries::table_row_counts(&state.db, &state.plan).await?;
    let total_rows = tables.values().sum();
    Ok(Json(DatabaseStatusResponse { tables, total_rows }))
}
