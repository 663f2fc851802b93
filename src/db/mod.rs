use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

pub mod queries;
pub mod schema;

/// Connection pool shared by table loads, validation and status queries.
///
/// A table load holds one connection for its whole transaction, and a full
/// validation runs its three categories concurrently, so the pool keeps a
/// few connections warm and waits longer than usual to acquire one.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections.max(4))
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(database_url)
        .await
}

/// Create the people-database tables if they do not exist yet
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    let migrator = sqlx::migrate!("./migrations");
    migrator
        .run(pool)
        .await
        .map_err(|e| sqlx::Error::Migrate(Box::new(e)))?;
    tracing::info!(migrations = migrator.iter().count(), "Schema up to date");
    Ok(())
}
