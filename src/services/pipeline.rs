//! Adapters from job kinds to pipeline stages.
//!
//! `PipelineStages::run` executes one job's stage and turns its outcome into
//! either a result payload or a failure with cause and partial payload. The
//! worker only ever sees these two shapes.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;

use crate::models::job::{FailureCause, Job, JobFailure, JobKind, JobResult};
use crate::services::cancel::{CancellationToken, Interrupt};
use crate::services::dataset_importer::{DatasetImportError, DatasetImporter};
use crate::services::fetcher::{FetchError, Fetcher};
use crate::services::importer::ImportError;
use crate::services::validator::{ValidationError, Validator};

/// Share of an import job's progress bar given to table loading when
/// validation follows.
const IMPORT_SHARE_WITH_VALIDATION: f64 = 0.9;

#[derive(Debug, Clone, PartialEq)]
pub struct StageSuccess {
    pub result: JobResult,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageFailure {
    pub failure: JobFailure,
    pub partial: Option<JobResult>,
}

impl StageFailure {
    pub fn new(cause: FailureCause, message: impl Into<String>) -> Self {
        Self {
            failure: JobFailure::new(cause, message),
            partial: None,
        }
    }

    pub fn interrupted(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Cancelled => Self::new(FailureCause::Cancelled, "Cancelled"),
            Interrupt::Timeout => Self::new(FailureCause::Timeout, "Job deadline exceeded"),
        }
    }

    pub fn with_partial(mut self, partial: JobResult) -> Self {
        self.partial = Some(partial);
        self
    }
}

#[async_trait]
pub trait PipelineStages: Send + Sync {
    async fn run(
        &self,
        job: &Job,
        cancel: &CancellationToken,
        progress: &(dyn Fn(f64, String) + Send + Sync),
    ) -> Result<StageSuccess, StageFailure>;
}

/// The real stages: fetcher, dataset importer and validator.
pub struct DatasetPipeline {
    fetcher: Arc<Fetcher>,
    importer: Arc<DatasetImporter>,
    validator: Arc<Validator>,
}

impl DatasetPipeline {
    pub fn new(fetcher: Arc<Fetcher>, importer: Arc<DatasetImporter>, validator: Arc<Validator>) -> Self {
        Self {
            fetcher,
            importer,
            validator,
        }
    }

    async fn download(
        &self,
        job: &Job,
        date: NaiveDate,
        cancel: &CancellationToken,
        progress: &(dyn Fn(f64, String) + Send + Sync),
    ) -> Result<StageSuccess, StageFailure> {
        let on_file = |p: crate::models::snapshot::FetchProgress| {
            progress(
                p.fraction(),
                format!("Fetched {} ({}/{})", p.file, p.completed, p.total),
            )
        };

        let report = self
            .fetcher
            .fetch(date, job.options.tables.as_deref(), job.options.force, cancel, &on_file)
            .await
            .map_err(|e| match e {
                FetchError::Interrupted { interrupt, partial } => {
                    StageFailure::interrupted(interrupt).with_partial(JobResult::Download(partial))
                }
                FetchError::Plan(e) => StageFailure::new(FailureCause::UnknownTable, e.to_string()),
                FetchError::Catalog(e) => {
                    StageFailure::new(FailureCause::CatalogUnavailable, e.to_string())
                }
                FetchError::Io(e) => StageFailure::new(FailureCause::Internal, e.to_string()),
            })?;

        if !report.failures.is_empty() {
            let files: Vec<_> = report.failures.iter().map(|f| f.file.as_str()).collect();
            let message = format!("{} file(s) could not be fetched: {}", files.len(), files.join(", "));
            return Err(StageFailure::new(FailureCause::FetchFailed, message)
                .with_partial(JobResult::Download(report)));
        }

        let mut message = format!(
            "{} file(s) present, {} downloaded",
            report.files.len(),
            report.downloaded_count()
        );
        if report.schema_missing {
            message.push_str("; snapshot has no schema file");
        }

        Ok(StageSuccess {
            result: JobResult::Download(report),
            message,
        })
    }

    async fn import(
        &self,
        job: &Job,
        date: NaiveDate,
        cancel: &CancellationToken,
        progress: &(dyn Fn(f64, String) + Send + Sync),
    ) -> Result<StageSuccess, StageFailure> {
        let share = if job.options.validate {
            IMPORT_SHARE_WITH_VALIDATION
        } else {
            1.0
        };
        let on_table = |p: crate::models::import::ImportProgress| {
            progress(
                p.fraction() * share,
                format!(
                    "{} {} ({}/{}), {} rows so far",
                    p.table, p.status, p.index, p.total, p.cumulative_rows
                ),
            )
        };

        let mut result = self
            .importer
            .import_dataset(date, job.options.tables.as_deref(), cancel, &on_table)
            .await
            .map_err(|e| match e {
                DatasetImportError::Interrupted { interrupt, partial } => {
                    StageFailure::interrupted(interrupt).with_partial(JobResult::Import(partial))
                }
                DatasetImportError::Plan(e) => {
                    StageFailure::new(FailureCause::UnknownTable, e.to_string())
                }
                DatasetImportError::Table(ImportError::Plan(e)) => {
                    StageFailure::new(FailureCause::UnknownTable, e.to_string())
                }
                DatasetImportError::Table(e) => StageFailure::new(FailureCause::Internal, e.to_string()),
                e @ DatasetImportError::NoLocalFiles { .. } => {
                    StageFailure::new(FailureCause::NoLocalFiles, e.to_string())
                }
            })?;

        if job.options.validate {
            progress(share, "Validating loaded data".to_string());
            match self
                .validator
                .run_full(job.options.expected_counts.as_ref(), cancel)
                .await
            {
                Ok(report) => result.validation = Some(report),
                Err(ValidationError::Interrupted(interrupt)) => {
                    return Err(StageFailure::interrupted(interrupt)
                        .with_partial(JobResult::Import(result)));
                }
            }
        }

        if !result.all_succeeded() {
            let failed = result.failed_tables();
            let message = format!(
                "{} of {} table(s) did not load: {}",
                failed.len(),
                result.tables.len(),
                failed.join(", ")
            );
            return Err(StageFailure::new(FailureCause::TablesFailed, message)
                .with_partial(JobResult::Import(result)));
        }

        let mut message = format!(
            "Imported {} rows into {} table(s)",
            result.total_inserted(),
            result.tables.len()
        );
        if let Some(report) = &result.validation {
            if !report.passed {
                message.push_str(&format!("; validation found {} failing check(s)", report.failed_checks));
            }
        }

        Ok(StageSuccess {
            result: JobResult::Import(result),
            message,
        })
    }

    async fn validate(
        &self,
        job: &Job,
        cancel: &CancellationToken,
        progress: &(dyn Fn(f64, String) + Send + Sync),
    ) -> Result<StageSuccess, StageFailure> {
        progress(0.0, "Running validation checks".to_string());
        let report = self
            .validator
            .run_full(job.options.expected_counts.as_ref(), cancel)
            .await
            .map_err(|ValidationError::Interrupted(interrupt)| StageFailure::interrupted(interrupt))?;

        let message = if report.passed {
            format!("All {} checks passed", report.total_checks)
        } else {
            format!(
                "{} of {} checks failed",
                report.failed_checks, report.total_checks
            )
        };

        Ok(StageSuccess {
            result: JobResult::Validate(report),
            message,
        })
    }
}

fn snapshot_date(job: &Job) -> Result<NaiveDate, StageFailure> {
    NaiveDate::parse_from_str(&job.target, "%Y-%m-%d").map_err(|e| {
        StageFailure::new(
            FailureCause::Internal,
            format!("Invalid snapshot date {:?}: {e}", job.target),
        )
    })
}

#[async_trait]
impl PipelineStages for DatasetPipeline {
    async fn run(
        &self,
        job: &Job,
        cancel: &CancellationToken,
        progress: &(dyn Fn(f64, String) + Send + Sync),
    ) -> Result<StageSuccess, StageFailure> {
        match job.kind {
            JobKind::Download => self.download(job, snapshot_date(job)?, cancel, progress).await,
            JobKind::Import => self.import(job, snapshot_date(job)?, cancel, progress).await,
            JobKind::Validate => self.validate(job, cancel, progress).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobOptions;

    #[test]
    fn test_interrupts_map_to_causes() {
        assert_eq!(
            StageFailure::interrupted(Interrupt::Cancelled).failure.cause,
            FailureCause::Cancelled
        );
        assert_eq!(
            StageFailure::interrupted(Interrupt::Timeout).failure.cause,
            FailureCause::Timeout
        );
    }

    #[test]
    fn test_snapshot_date_from_target() {
        let job = Job::new(JobKind::Import, "2024-10-31", JobOptions::default());
        assert_eq!(snapshot_date(&job).unwrap(), NaiveDate::from_ymd_opt(2024, 10, 31).unwrap());

        let job = Job::new(JobKind::Import, "latest", JobOptions::default());
        assert_eq!(snapshot_date(&job).unwrap_err().failure.cause, FailureCause::Internal);
    }
}
