use axum::extract::State;
use axum::response::IntoResponse;

use crate::app_state::MetricsState;

/// GET /metrics: Prometheus text exposition, with the queue depth sampled
/// at scrape time.
pub async fn prometheus_metrics(State(state): State<MetricsState>) -> impl IntoResponse {
    match state.queue.queue_depth().await {
        Ok(depth) => metrics::gauge!("jobs_queue_depth").set(depth as f64),
        Err(e) => tracing::warn!(error = %e, "Failed to sample queue depth"),
    }
    state.handle.render()
}
