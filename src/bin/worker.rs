use courtlistener_loader::{
    config::AppConfig,
    db,
    services::{
        catalog::DatasetCatalog,
        dataset_importer::DatasetImporter,
        fetcher::Fetcher,
        importer::TableImporter,
        job_store::{JobStore, RedisJobStore},
        pipeline::{DatasetPipeline, PipelineStages},
        plan::ImportPlan,
        queue::{JobQueue, RedisJobQueue},
        storage::{ObjectStore, S3BucketStore},
        validator::Validator,
        worker::{Worker, WorkerSettings},
    },
};
use std::sync::Arc;
use tokio::sync::watch;
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

    tracing::info!("Starting courtlistener-loader worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    let plan = ImportPlan::people_db();
    plan.validate().expect("Import plan violates foreign-key order");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!(data_dir = %config.data_dir.display(), "Initializing pipeline stages");
    let store: Arc<dyn ObjectStore> = Arc::new(
        S3BucketStore::new(
            &config.s3_bucket,
            &config.s3_region,
            config.s3_endpoint.as_deref(),
        )
        .expect("Failed to initialize bulk-data bucket client"),
    );
    let catalog = Arc::new(DatasetCatalog::new(
        store.clone(),
        config.s3_prefix.clone(),
        plan.clone(),
    ));
    let fetcher = Fetcher::new(
        store,
        catalog,
        plan.clone(),
        config.data_dir.clone(),
        config.fetch_concurrency,
    );
    let table_importer = TableImporter::new(db_pool.clone(), plan.clone(), config.import_batch_size);
    let dataset_importer =
        DatasetImporter::new(Arc::new(table_importer), plan.clone(), config.data_dir.clone());
    let validator = Validator::new(db_pool, plan, config.validation_report_limit);
    let stages: Arc<dyn PipelineStages> = Arc::new(DatasetPipeline::new(
        Arc::new(fetcher),
        Arc::new(dataset_importer),
        Arc::new(validator),
    ));

    let queue: Arc<dyn JobQueue> =
        Arc::new(RedisJobQueue::new(&config.redis_url).expect("Failed to initialize job queue"));
    let job_store: Arc<dyn JobStore> = Arc::new(
        RedisJobStore::new(&config.redis_url, config.job_ttl())
            .expect("Failed to initialize job store"),
    );

    let settings = WorkerSettings {
        default_timeout: config.job_timeout(),
        poll_interval: config.poll_interval(),
        ..Default::default()
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();
    for n in 0..config.worker_concurrency.max(1) {
        let worker = Worker::new(
            format!("worker-{n}"),
            job_store.clone(),
            queue.clone(),
            stages.clone(),
            settings.clone(),
        );
        let shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move { worker.run(shutdown).await }));
    }

    tracing::info!(workers = handles.len(), "Worker ready, processing jobs");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
    tracing::info!("Shutdown requested, letting running jobs finish");
    let _ = shutdown_tx.send(true);

    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker task panicked");
        }
    }
}
