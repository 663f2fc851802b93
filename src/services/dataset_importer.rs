//! Dataset importer
//!
//! Runs the table importer over every requested table of one snapshot,
//! strictly one table at a time in plan order. A failed table does not stop
//! the run; the result carries a per-table verdict.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::models::import::{DatasetImportResult, ImportProgress, ImportResult, TableStatus};
use crate::models::snapshot::FileKind;
use crate::services::cancel::{CancellationToken, Interrupt};
use crate::services::importer::{ImportError, TableLoader};
use crate::services::plan::{ImportPlan, PlanError, TableSpec};

#[derive(Debug, thiserror::Error)]
pub enum DatasetImportError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("No local CSV files for snapshot {date} in {dir}")]
    NoLocalFiles { date: NaiveDate, dir: PathBuf },

    #[error(transparent)]
    Table(#[from] ImportError),

    #[error("Import interrupted: {interrupt}")]
    Interrupted {
        interrupt: Interrupt,
        partial: DatasetImportResult,
    },
}

pub struct DatasetImporter {
    loader: Arc<dyn TableLoader>,
    plan: ImportPlan,
    data_dir: PathBuf,
}

impl DatasetImporter {
    pub fn new(loader: Arc<dyn TableLoader>, plan: ImportPlan, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            loader,
            plan,
            data_dir: data_dir.into(),
        }
    }

    pub fn csv_path(&self, table: &str, date: NaiveDate) -> PathBuf {
        self.data_dir
            .join(FileKind::Table(table.to_string()).local_file_name(date))
    }

    /// Which of the given tables have a local CSV for this snapshot.
    pub async fn verify_files_exist(
        &self,
        date: NaiveDate,
        tables: &[TableSpec],
    ) -> BTreeMap<String, bool> {
        let mut present = BTreeMap::new();
        for table in tables {
            let exists = tokio::fs::try_exists(self.csv_path(table.name, date))
                .await
                .unwrap_or(false);
            present.insert(table.name.to_string(), exists);
        }
        present
    }

    /// Import the requested tables (all by default) of one snapshot.
    ///
    /// The token is checked before each table; a table already started is
    /// always allowed to commit or roll back.
    pub async fn import_dataset(
        &self,
        date: NaiveDate,
        tables: Option<&[String]>,
        cancel: &CancellationToken,
        progress: &(dyn Fn(ImportProgress) + Send + Sync),
    ) -> Result<DatasetImportResult, DatasetImportError> {
        let specs = self.plan.resolve(tables)?;
        let present = self.verify_files_exist(date, &specs).await;

        if !present.values().any(|exists| *exists) {
            return Err(DatasetImportError::NoLocalFiles {
                date,
                dir: self.data_dir.clone(),
            });
        }

        let started = Instant::now();
        let total = specs.len();
        let mut result = DatasetImportResult {
            date: Some(date),
            ..Default::default()
        };
        let mut unhealthy: HashSet<&str> = HashSet::new();
        let mut cumulative_rows = 0;

        tracing::info!(%date, tables = total, "Starting dataset import");

        for (index, spec) in specs.iter().enumerate() {
            if let Err(interrupt) = cancel.check() {
                result.not_started = specs[index..].iter().map(|t| t.name.to_string()).collect();
                result.elapsed_ms = started.elapsed().as_millis() as u64;
                tracing::info!(
                    %date,
                    %interrupt,
                    completed = index,
                    "Dataset import interrupted"
                );
                return Err(DatasetImportError::Interrupted {
                    interrupt,
                    partial: result,
                });
            }

            let table_result = if present.get(spec.name).copied().unwrap_or(false) {
                if let Some(dependency) = spec.depends_on.iter().find(|d| unhealthy.contains(*d)) {
                    tracing::warn!(
                        table = %spec.name,
                        dependency = %dependency,
                        "Importing table whose dependency did not load"
                    );
                }
                self.loader
                    .import_table(spec.name, &self.csv_path(spec.name, date))
                    .await?
            } else {
                tracing::warn!(table = %spec.name, %date, "No local file, skipping table");
                ImportResult::skipped(spec.name, "No local file for this snapshot")
            };

            if table_result.status != TableStatus::Succeeded {
                unhealthy.insert(spec.name);
                let dependents = self.plan.dependents_of(spec.name);
                if table_result.status == TableStatus::Failed && !dependents.is_empty() {
                    tracing::warn!(
                        table = %spec.name,
                        ?dependents,
                        "Table failed; continuing with remaining tables"
                    );
                }
            }

            cumulative_rows += table_result.rows_inserted;
            progress(ImportProgress {
                table: spec.name.to_string(),
                index: index + 1,
                total,
                cumulative_rows,
                status: table_result.status,
            });
            result.tables.push(table_result);
        }

        result.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            %date,
            inserted = result.total_inserted(),
            failed = ?result.failed_tables(),
            elapsed_ms = result.elapsed_ms,
            "Dataset import finished"
        );

        Ok(result)
    }
}
