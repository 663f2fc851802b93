use axum::{routing::get, routing::post, Router};
use courtlistener_loader::{
    app_state::{AppState, MetricsState},
    config::AppConfig,
    db, routes,
    services::{
        catalog::DatasetCatalog,
        job_store::RedisJobStore,
        orchestrator::JobOrchestrator,
        plan::ImportPlan,
        queue::{JobQueue, RedisJobQueue},
        storage::S3BucketStore,
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing courtlistener-loader server");

    let plan = ImportPlan::people_db();
    plan.validate().expect("Import plan violates foreign-key order");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("jobs_enqueued_total", "Total pipeline jobs submitted");
    metrics::describe_counter!("jobs_completed_total", "Total pipeline jobs that succeeded");
    metrics::describe_counter!("jobs_failed_total", "Total pipeline jobs that failed");
    metrics::describe_gauge!("jobs_queue_depth", "Current number of pending jobs in the queue");

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Bulk-data bucket, read anonymously
    tracing::info!(bucket = %config.s3_bucket, "Initializing bulk-data catalog");
    let store = S3BucketStore::new(
        &config.s3_bucket,
        &config.s3_region,
        config.s3_endpoint.as_deref(),
    )
    .expect("Failed to initialize bulk-data bucket client");
    let catalog = DatasetCatalog::new(Arc::new(store), config.s3_prefix.clone(), plan.clone());

    // Initialize Redis job queue and job store
    tracing::info!("Connecting to Redis job queue");
    let queue: Arc<dyn JobQueue> =
        Arc::new(RedisJobQueue::new(&config.redis_url).expect("Failed to initialize job queue"));
    let job_store = RedisJobStore::new(&config.redis_url, config.job_ttl())
        .expect("Failed to initialize job store");
    let orchestrator = JobOrchestrator::new(Arc::new(job_store), queue.clone(), plan.clone());

    // Create shared application state
    let state = AppState::new(db_pool, catalog, orchestrator, queue.clone(), plan);
    let metrics_state = MetricsState {
        handle: prometheus_handle,
        queue,
    };

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/datasets", get(routes::datasets::list_datasets))
        .route("/api/v1/datasets/{date}", get(routes::datasets::get_dataset))
        .route("/api/v1/database/status", get(routes::database::database_status))
        .route("/api/v1/jobs", post(routes::jobs::create_job))
        .route("/api/v1/jobs/{job_id}", get(routes::jobs::get_job))
        .route("/api/v1/jobs/{job_id}/cancel", post(routes::jobs::cancel_job))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(metrics_state),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(64 * 1024));

    tracing::info!("Starting courtlistener-loader on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
