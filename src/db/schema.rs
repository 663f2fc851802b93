use sqlx::{PgPool, Row};

use crate::services::csv_rows::ColumnInfo;

/// A single-column foreign key between two tables.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub constraint: String,
    pub table: String,
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

/// Quote an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Live columns of a table in ordinal order; empty if the table does not exist.
pub async fn table_columns(pool: &PgPool, table: &str) -> Result<Vec<ColumnInfo>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT a.attname::text AS name,
               format_type(a.atttypid, a.atttypmod) AS data_type
        FROM pg_attribute a
        WHERE a.attrelid = to_regclass($1::text)
          AND a.attnum > 0
          AND NOT a.attisdropped
        ORDER BY a.attnum
        "#,
    )
    .bind(table)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|r| {
            Ok(ColumnInfo {
                name: r.try_get("name")?,
                data_type: r.try_get("data_type")?,
            })
        })
        .collect()
}

/// Single-column foreign keys declared in the current schema.
pub async fn foreign_keys(pool: &PgPool) -> Result<Vec<ForeignKey>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT con.conname::text AS constraint_name,
               src.relname::text AS table_name,
               src_col.attname::text AS column_name,
               ref.relname::text AS ref_table,
               ref_col.attname::text AS ref_column
        FROM pg_constraint con
        JOIN pg_class src ON src.oid = con.conrelid
        JOIN pg_class ref ON ref.oid = con.confrelid
        JOIN pg_namespace ns ON ns.oid = src.relnamespace
        JOIN pg_attribute src_col
          ON src_col.attrelid = con.conrelid AND src_col.attnum = con.conkey[1]
        JOIN pg_attribute ref_col
          ON ref_col.attrelid = con.confrelid AND ref_col.attnum = con.confkey[1]
        WHERE con.contype = 'f'
          AND ns.nspname = current_schema()
          AND cardinality(con.conkey) = 1
        ORDER BY src.relname, con.conname
        "#,
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|r| {
            Ok(ForeignKey {
                constraint: r.try_get("constraint_name")?,
                table: r.try_get("table_name")?,
                column: r.try_get("column_name")?,
                ref_table: r.try_get("ref_table")?,
                ref_column: r.try_get("ref_column")?,
            })
        })
        .collect()
}
