//! Table importer
//!
//! Loads one local CSV file into one table. The live column set is read from
//! the catalog, the file header is reconciled against it, and every parsed
//! row is inserted inside a single transaction. Parsing runs on a blocking
//! thread and hands batches to the insert loop over a bounded channel.

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::mpsc;

use crate::db::{queries, schema};
use crate::models::import::ImportResult;
use crate::services::csv_rows::{self, ColumnMapping, NoCommonColumns, ParseSummary, Row, RowError};
use crate::services::plan::{ImportPlan, PlanError, TableSpec};

/// Postgres rejects statements with more bind parameters than this.
const MAX_BIND_PARAMS: usize = u16::MAX as usize;

/// Batches buffered between the parser and the insert loop.
const CHANNEL_DEPTH: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("Table {0} does not exist in the database")]
    MissingTable(String),

    #[error(transparent)]
    Columns(#[from] NoCommonColumns),

    #[error("Failed to read {path}: {source}")]
    Read { path: PathBuf, source: csv::Error },

    #[error("Transaction failed: {0}")]
    Transaction(#[from] sqlx::Error),

    #[error("CSV parser task failed: {0}")]
    Parser(String),
}

/// Loads one file into one table.
///
/// `Err` is reserved for caller errors (an unknown table); everything that
/// goes wrong during the load itself is recorded in the returned result.
#[async_trait]
pub trait TableLoader: Send + Sync {
    async fn import_table(&self, table: &str, path: &Path) -> Result<ImportResult, ImportError>;
}

enum ParseEvent {
    Batch(Vec<Row>),
    RowError { line: u64, error: RowError },
}

pub struct TableImporter {
    pool: PgPool,
    plan: ImportPlan,
    batch_size: usize,
}

impl TableImporter {
    pub fn new(pool: PgPool, plan: ImportPlan, batch_size: usize) -> Self {
        Self {
            pool,
            plan,
            batch_size: batch_size.max(1),
        }
    }

    async fn load(
        &self,
        spec: &TableSpec,
        path: &Path,
        result: &mut ImportResult,
    ) -> Result<(), ImportError> {
        let columns = schema::table_columns(&self.pool, spec.name).await?;
        if columns.is_empty() {
            return Err(ImportError::MissingTable(spec.name.to_string()));
        }

        let header = read_header(path.to_path_buf()).await?;
        let mapping = csv_rows::reconcile(spec.name, &header, &columns, spec.integer_id)?;

        result.dropped_columns = mapping.dropped.clone();
        result.missing_columns = mapping.missing.clone();
        if !mapping.dropped.is_empty() {
            tracing::warn!(
                table = %spec.name,
                dropped = ?mapping.dropped,
                "File columns not in table schema will not be loaded"
            );
        }
        if !mapping.missing.is_empty() {
            tracing::debug!(
                table = %spec.name,
                missing = ?mapping.missing,
                "Table columns absent from file left at defaults"
            );
        }

        let batch_rows = self
            .batch_size
            .min(MAX_BIND_PARAMS / mapping.columns.len())
            .max(1);

        let (sender, mut receiver) = mpsc::channel(CHANNEL_DEPTH);
        let parser = spawn_parser(path.to_path_buf(), mapping.clone(), batch_rows, sender);

        let mut tx = self.pool.begin().await?;
        let streamed = stream_rows(&mut tx, spec.name, &mapping, &mut receiver, result).await;
        drop(receiver);

        let parsed = match parser.await {
            Ok(Ok(summary)) => Ok(summary),
            Ok(Err(source)) => Err(ImportError::Read {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) => Err(ImportError::Parser(e.to_string())),
        };

        match (streamed, parsed) {
            (Ok(()), Ok(summary)) => {
                tx.commit().await?;
                tracing::debug!(
                    table = %spec.name,
                    parsed = summary.rows,
                    skipped = summary.skipped,
                    "Committed table load"
                );
                Ok(())
            }
            (Err(e), _) | (Ok(()), Err(e)) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(table = %spec.name, error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}

#[async_trait]
impl TableLoader for TableImporter {
    async fn import_table(&self, table: &str, path: &Path) -> Result<ImportResult, ImportError> {
        let spec = *self
            .plan
            .get(table)
            .ok_or_else(|| PlanError::UnknownTable(table.to_string()))?;

        let started = Instant::now();
        let mut result = ImportResult::new(spec.name);

        tracing::info!(table = %spec.name, path = %path.display(), "Importing table");

        match self.load(&spec, path, &mut result).await {
            Ok(()) => {
                // Statistics only; a failure here does not undo the load.
                if let Err(e) = queries::analyze_table(&self.pool, spec.name).await {
                    tracing::warn!(table = %spec.name, error = %e, "ANALYZE failed after load");
                }
                metrics::counter!("import_rows_inserted_total", "table" => spec.name)
                    .increment(result.rows_inserted);
            }
            Err(e) => {
                tracing::warn!(table = %spec.name, error = %e, "Table import rolled back");
                result.fail(e.to_string());
            }
        }

        if result.rows_skipped > 0 {
            tracing::warn!(
                table = %spec.name,
                skipped = result.rows_skipped,
                "Skipped malformed rows"
            );
            metrics::counter!("import_rows_skipped_total", "table" => spec.name)
                .increment(result.rows_skipped);
        }

        let elapsed = started.elapsed();
        result.elapsed_ms = elapsed.as_millis() as u64;
        metrics::histogram!("table_import_seconds", "table" => spec.name)
            .record(elapsed.as_secs_f64());

        tracing::info!(
            table = %spec.name,
            status = %result.status,
            attempted = result.rows_attempted,
            inserted = result.rows_inserted,
            skipped = result.rows_skipped,
            elapsed_ms = result.elapsed_ms,
            "Table import finished"
        );

        Ok(result)
    }
}

async fn read_header(path: PathBuf) -> Result<Vec<String>, ImportError> {
    tokio::task::spawn_blocking(move || {
        std::fs::File::open(&path)
            .map_err(csv::Error::from)
            .and_then(csv_rows::read_header)
            .map_err(|source| ImportError::Read { path, source })
    })
    .await
    .map_err(|e| ImportError::Parser(e.to_string()))?
}

fn spawn_parser(
    path: PathBuf,
    mapping: ColumnMapping,
    batch_rows: usize,
    sender: mpsc::Sender<ParseEvent>,
) -> tokio::task::JoinHandle<Result<ParseSummary, csv::Error>> {
    tokio::task::spawn_blocking(move || {
        let file = std::fs::File::open(&path)?;
        csv_rows::read_rows(
            file,
            &mapping,
            batch_rows,
            |line, error| {
                let _ = sender.blocking_send(ParseEvent::RowError { line, error });
            },
            |rows| sender.blocking_send(ParseEvent::Batch(rows)).is_ok(),
        )
    })
}

async fn stream_rows(
    conn: &mut PgConnection,
    table: &str,
    mapping: &ColumnMapping,
    receiver: &mut mpsc::Receiver<ParseEvent>,
    result: &mut ImportResult,
) -> Result<(), ImportError> {
    while let Some(event) = receiver.recv().await {
        match event {
            ParseEvent::Batch(rows) => {
                result.rows_attempted += rows.len() as u64;
                let inserted = insert_batch(conn, table, mapping, &rows).await?;
                result.rows_inserted += inserted;
                tracing::debug!(table = %table, rows = rows.len(), inserted, "Inserted batch");
            }
            ParseEvent::RowError { line, error } => {
                result.record_row_error(format!("line {line}: {error}"));
            }
        }
    }
    Ok(())
}

/// Multi-row insert; rows colliding with an existing key are left untouched.
async fn insert_batch(
    conn: &mut PgConnection,
    table: &str,
    mapping: &ColumnMapping,
    rows: &[Row],
) -> Result<u64, sqlx::Error> {
    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("INSERT INTO {} (", schema::quote_ident(table)));
    {
        let mut columns = builder.separated(", ");
        for column in &mapping.columns {
            columns.push(schema::quote_ident(&column.name));
        }
    }
    builder.push(") ");

    builder.push_values(rows, |mut values, row| {
        for (value, column) in row.iter().zip(&mapping.columns) {
            values
                .push_bind(value.clone())
                .push_unseparated(format!("::{}", column.cast));
        }
    });
    builder.push(" ON CONFLICT DO NOTHING");

    let done = builder.build().execute(&mut *conn).await?;
    Ok(done.rows_affected())
}
