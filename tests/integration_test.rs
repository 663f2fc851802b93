use courtlistener_loader::{
    config::AppConfig,
    db::{self, queries},
    models::{
        import::TableStatus,
        validation::CheckCategory,
    },
    services::{
        cancel::CancellationToken,
        importer::{TableImporter, TableLoader},
        job_store::{JobStore, RedisJobStore},
        plan::ImportPlan,
        validator::Validator,
    },
};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

/// Integration tests against real PostgreSQL and Redis instances configured
/// via DATABASE_URL and REDIS_URL.
///
/// Rows use ids far above the published range and are removed first, so the
/// tests can run against a database holding a real snapshot.
///
/// Run with: cargo test --test integration_test -- --ignored
const TEST_IDS: &str = "id BETWEEN 990000000 AND 990000999";

async fn connect() -> (AppConfig, PgPool) {
    let config = AppConfig::from_env().expect("Failed to load config");
    let pool = db::init_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    (config, pool)
}

async fn clear_test_rows(pool: &PgPool, table: &str) {
    sqlx::query(&format!("DELETE FROM {table} WHERE {TEST_IDS}"))
        .execute(pool)
        .await
        .expect("Failed to clear test rows");
}

async fn clear_test_people(pool: &PgPool) {
    clear_test_rows(pool, "people_db_position").await;
    clear_test_rows(pool, "people_db_person").await;
}

async fn count_test_rows(pool: &PgPool, table: &str) -> i64 {
    let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table} WHERE {TEST_IDS}"))
        .fetch_one(pool)
        .await
        .expect("Failed to count test rows");
    count
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_table_import_into_postgres() {
    let (config, pool) = connect().await;
    clear_test_people(&pool).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people_db_person-2024-10-31.csv");
    // One malformed row and one column the table does not have.
    std::fs::write(
        &path,
        "id,name_first,name_last,date_dob,gender,nickname\n\
         990000001,Ruth,Ginsburg,1933-03-15,f,RBG\n\
         990000002,\"Sandra, Day\",O'Connor,1930-03-26,f,\n\
         990000003,broken\n\
         990000004,,,0,,\n",
    )
    .unwrap();

    let importer = TableImporter::new(pool.clone(), ImportPlan::people_db(), config.import_batch_size);

    let first = importer
        .import_table("people_db_person", &path)
        .await
        .expect("import call failed");
    assert_eq!(first.status, TableStatus::Succeeded, "{:?}", first.failure);
    assert_eq!(first.rows_inserted, 3);
    assert_eq!(first.rows_skipped, 1);
    assert_eq!(first.dropped_columns, vec!["nickname"]);

    let (first_name, dob): (Option<String>, Option<chrono::NaiveDate>) =
        sqlx::query_as("SELECT name_first, date_dob FROM people_db_person WHERE id = 990000002")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(first_name.as_deref(), Some("Sandra, Day"));
    assert_eq!(dob, chrono::NaiveDate::from_ymd_opt(1930, 3, 26));

    let (dob,): (Option<chrono::NaiveDate>,) =
        sqlx::query_as("SELECT date_dob FROM people_db_person WHERE id = 990000004")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert!(dob.is_none(), "zero dates load as NULL");

    // Re-import of the same file appends nothing.
    let second = importer
        .import_table("people_db_person", &path)
        .await
        .expect("import call failed");
    assert_eq!(second.status, TableStatus::Succeeded);
    assert_eq!(second.rows_inserted, 0);

    // Nameless person is reported by the data-quality checks.
    let validator = Validator::new(pool.clone(), ImportPlan::people_db(), 1000);
    let checks = validator
        .validate_data_quality(&CancellationToken::new())
        .await
        .unwrap();
    let names = checks
        .iter()
        .find(|c| c.name == "person_name_present")
        .expect("name rule ran");
    assert_eq!(names.category, CheckCategory::DataQuality);
    assert!(!names.passed);
    assert!(names.offending_ids.contains(&"990000004".to_string()));

    clear_test_people(&pool).await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_import_of_file_without_known_columns_fails() {
    let (config, pool) = connect().await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people_db_person-2024-10-31.csv");
    std::fs::write(&path, "foo,bar\n1,2\n").unwrap();

    let importer = TableImporter::new(pool.clone(), ImportPlan::people_db(), config.import_batch_size);
    let result = importer.import_table("people_db_person", &path).await.unwrap();

    assert_eq!(result.status, TableStatus::Failed);
    assert_eq!(result.rows_inserted, 0);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_rejected_batch_rolls_back_earlier_batches() {
    let (_config, pool) = connect().await;
    clear_test_people(&pool).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people_db_person-2024-10-31.csv");
    // February 30th parses as CSV but the database refuses it.
    std::fs::write(
        &path,
        "id,name_first,name_last,date_dob\n\
         990000011,Ruth,Ginsburg,1933-03-15\n\
         990000012,Bad,Date,1933-02-30\n\
         990000013,Sandra,O'Connor,1930-03-26\n",
    )
    .unwrap();

    // One row per batch, so the first row is already flushed when the second fails.
    let importer = TableImporter::new(pool.clone(), ImportPlan::people_db(), 1);
    let result = importer
        .import_table("people_db_person", &path)
        .await
        .expect("import call failed");

    assert_eq!(result.status, TableStatus::Failed);
    assert_eq!(result.rows_inserted, 0);
    assert!(result.failure.is_some());
    assert_eq!(count_test_rows(&pool, "people_db_person").await, 0);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_dangling_reference_fails_at_commit() {
    let (config, pool) = connect().await;
    clear_test_people(&pool).await;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people_db_position-2024-10-31.csv");
    // Person 990000999 is never created.
    std::fs::write(
        &path,
        "id,person_id,position_type,date_start\n\
         990000021,990000999,jud,1990-01-01\n",
    )
    .unwrap();

    let importer = TableImporter::new(pool.clone(), ImportPlan::people_db(), config.import_batch_size);
    let result = importer
        .import_table("people_db_position", &path)
        .await
        .expect("import call failed");

    assert_eq!(result.status, TableStatus::Failed);
    assert_eq!(result.rows_inserted, 0);
    let failure = result.failure.expect("failure cause recorded");
    assert!(failure.contains("foreign key"), "unexpected failure: {failure}");
    assert_eq!(count_test_rows(&pool, "people_db_position").await, 0);
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_full_validation_reports_seeded_violation() {
    let (_config, pool) = connect().await;
    clear_test_people(&pool).await;
    sqlx::query("INSERT INTO people_db_person (id) VALUES (990000031)")
        .execute(&pool)
        .await
        .expect("Failed to seed nameless person");

    let validator = Validator::new(pool.clone(), ImportPlan::people_db(), 1000);
    let report = validator
        .run_full(None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.categories.len(), 3);
    assert!(!report.passed);
    assert!(report.category(CheckCategory::ForeignKeys).is_some());
    assert!(report.category(CheckCategory::RecordCounts).is_some());
    let quality = report
        .category(CheckCategory::DataQuality)
        .expect("data quality category");
    assert!(!quality.passed);
    let names = quality
        .checks
        .iter()
        .find(|c| c.name == "person_name_present")
        .expect("name rule ran");
    assert!(names.offending_ids.contains(&"990000031".to_string()));

    clear_test_people(&pool).await;
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_row_counts_cover_every_table() {
    let (_config, pool) = connect().await;
    let plan = ImportPlan::people_db();

    let counts = queries::table_row_counts(&pool, &plan).await.unwrap();
    assert_eq!(counts.len(), plan.tables().len());
    assert!(counts.values().all(|count| *count >= 0));
}

#[tokio::test]
#[ignore] // Requires PostgreSQL
async fn test_full_validation_on_live_database() {
    let (_config, pool) = connect().await;
    let validator = Validator::new(pool, ImportPlan::people_db(), 10);

    let report = validator
        .run_full(None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.categories.len(), 3);
    assert_eq!(
        report.failed_checks,
        report.failures().count(),
        "failed count matches failing checks"
    );
    for check in report.failures() {
        assert!(check.offending_ids.len() <= 10);
    }
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_job_store_claims_and_cancellation() {
    let config = AppConfig::from_env().expect("Failed to load config");
    let store = RedisJobStore::new(&config.redis_url, Duration::from_secs(60))
        .expect("Failed to initialize job store");

    let target = format!("import:test-{}", Uuid::new_v4());
    let first = Uuid::new_v4();
    let second = Uuid::new_v4();

    assert_eq!(store.try_claim_target(&target, first).await.unwrap(), None);
    assert_eq!(store.try_claim_target(&target, second).await.unwrap(), Some(first));

    // Only the holder can release.
    store.release_target(&target, second).await.unwrap();
    assert_eq!(store.try_claim_target(&target, second).await.unwrap(), Some(first));

    store.release_target(&target, first).await.unwrap();
    assert_eq!(store.try_claim_target(&target, second).await.unwrap(), None);
    store.release_target(&target, second).await.unwrap();

    assert!(!store.is_cancel_requested(first).await.unwrap());
    store.request_cancel(first).await.unwrap();
    assert!(store.is_cancel_requested(first).await.unwrap());
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_redis_expired_claim_is_retaken() {
    let config = AppConfig::from_env().expect("Failed to load config");
    let store = RedisJobStore::new(&config.redis_url, Duration::from_secs(1))
        .expect("Failed to initialize job store");

    let target = format!("import:test-{}", Uuid::new_v4());
    let stale = Uuid::new_v4();
    let fresh = Uuid::new_v4();

    assert_eq!(store.try_claim_target(&target, stale).await.unwrap(), None);
    tokio::time::sleep(Duration::from_millis(1500)).await;

    // Never reports a holder that no longer exists.
    assert_eq!(store.try_claim_target(&target, fresh).await.unwrap(), None);
    assert_eq!(store.try_claim_target(&target, stale).await.unwrap(), Some(fresh));
    store.release_target(&target, fresh).await.unwrap();
}
