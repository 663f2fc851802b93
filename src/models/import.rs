use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::models::validation::ValidationReport;

/// Row-level error messages kept per table; the count is always exact.
pub const MAX_REPORTED_ROW_ERRORS: usize = 50;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, EnumString, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TableStatus {
    Succeeded,
    Failed,
    /// No local file for the table; nothing was attempted.
    Skipped,
}

/// Outcome of loading one CSV file into one table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportResult {
    pub table: String,
    pub status: TableStatus,
    /// Parsed rows sent to the database.
    pub rows_attempted: u64,
    /// Rows that were new; duplicates of existing keys are not counted.
    pub rows_inserted: u64,
    /// Malformed rows dropped before reaching the database.
    pub rows_skipped: u64,
    /// First row-level errors, capped at `MAX_REPORTED_ROW_ERRORS`.
    pub errors: Vec<String>,
    /// File columns absent from the table schema.
    pub dropped_columns: Vec<String>,
    /// Table columns absent from the file, left at their defaults.
    pub missing_columns: Vec<String>,
    /// Transaction-level failure that rolled the table back.
    pub failure: Option<String>,
    pub elapsed_ms: u64,
}

impl ImportResult {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            status: TableStatus::Succeeded,
            rows_attempted: 0,
            rows_inserted: 0,
            rows_skipped: 0,
            errors: Vec::new(),
            dropped_columns: Vec::new(),
            missing_columns: Vec::new(),
            failure: None,
            elapsed_ms: 0,
        }
    }

    pub fn skipped(table: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut result = Self::new(table);
        result.status = TableStatus::Skipped;
        result.failure = Some(reason.into());
        result
    }

    /// Record a rolled-back load: nothing from this file is in the table.
    pub fn fail(&mut self, cause: impl Into<String>) {
        self.status = TableStatus::Failed;
        self.rows_inserted = 0;
        self.failure = Some(cause.into());
    }

    pub fn record_row_error(&mut self, message: String) {
        self.rows_skipped += 1;
        if self.errors.len() < MAX_REPORTED_ROW_ERRORS {
            self.errors.push(message);
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == TableStatus::Succeeded
    }
}

/// Per-table results of one dataset import, in plan order.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DatasetImportResult {
    pub date: Option<NaiveDate>,
    pub tables: Vec<ImportResult>,
    /// Requested tables never started because the run was interrupted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_started: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
    pub elapsed_ms: u64,
}

impl DatasetImportResult {
    pub fn total_inserted(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_inserted).sum()
    }

    pub fn total_skipped(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_skipped).sum()
    }

    pub fn failed_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.status != TableStatus::Succeeded)
            .map(|t| t.table.as_str())
            .collect()
    }

    pub fn all_succeeded(&self) -> bool {
        self.not_started.is_empty() && self.tables.iter().all(|t| t.succeeded())
    }

    /// Inserted row counts keyed by table, for record-count validation.
    pub fn inserted_counts(&self) -> std::collections::BTreeMap<String, i64> {
        self.tables
            .iter()
            .filter(|t| t.succeeded())
            .map(|t| (t.table.clone(), t.rows_inserted as i64))
            .collect()
    }
}

/// Emitted after each table completes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportProgress {
    pub table: String,
    /// 1-based position of the finished table within this run.
    pub index: usize,
    pub total: usize,
    pub cumulative_rows: u64,
    pub status: TableStatus,
}

impl ImportProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.index as f64 / self.total as f64
        }
    }
}
