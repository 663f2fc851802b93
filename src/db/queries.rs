use sqlx::PgPool;
use std::collections::BTreeMap;

use crate::db::schema::quote_ident;
use crate::services::plan::ImportPlan;

/// Exact row count of one table
pub async fn count_rows(pool: &PgPool, table: &str) -> Result<i64, sqlx::Error> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    sqlx::query_scalar(&sql).fetch_one(pool).await
}

/// Row counts of every plan table that exists
///
/// Tables not yet created are reported as zero.
pub async fn table_row_counts(
    pool: &PgPool,
    plan: &ImportPlan,
) -> Result<BTreeMap<String, i64>, sqlx::Error> {
    let mut counts = BTreeMap::new();

    for table in plan.tables() {
        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1::text) IS NOT NULL")
            .bind(table.name)
            .fetch_one(pool)
            .await?;

        let count = if exists {
            count_rows(pool, table.name).await?
        } else {
            0
        };
        counts.insert(table.name.to_string(), count);
    }

    Ok(counts)
}

/// Update planner statistics after a bulk load
pub async fn analyze_table(pool: &PgPool, table: &str) -> Result<(), sqlx::Error> {
    let sql = format!("ANALYZE {}", quote_ident(table));
    sqlx::query(&sql).execute(pool).await?;
    Ok(())
}

/// Check database connectivity
pub async fn ping(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
