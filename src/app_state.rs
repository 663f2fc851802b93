use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use std::sync::Arc;

use crate::services::{
    catalog::DatasetCatalog, orchestrator::JobOrchestrator, plan::ImportPlan, queue::JobQueue,
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub catalog: Arc<DatasetCatalog>,
    pub orchestrator: Arc<JobOrchestrator>,
    pub queue: Arc<dyn JobQueue>,
    pub plan: ImportPlan,
}

impl AppState {
    pub fn new(
        db: PgPool,
        catalog: DatasetCatalog,
        orchestrator: JobOrchestrator,
        queue: Arc<dyn JobQueue>,
        plan: ImportPlan,
    ) -> Self {
        Self {
            db,
            catalog: Arc::new(catalog),
            orchestrator: Arc::new(orchestrator),
            queue,
            plan,
        }
    }
}

/// State of the Prometheus scrape endpoint.
#[derive(Clone)]
pub struct MetricsState {
    pub handle: Arc<PrometheusHandle>,
    pub queue: Arc<dyn JobQueue>,
}
