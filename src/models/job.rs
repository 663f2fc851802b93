use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::import::DatasetImportResult;
use crate::models::snapshot::FetchReport;
use crate::models::validation::ValidationReport;

/// Pipeline stage a job runs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, EnumString, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobKind {
    Download,
    Import,
    Validate,
}

/// Lifecycle of a job: pending -> running -> {succeeded, failed}.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, EnumString, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    pub fn can_transition_to(self, next: JobState) -> bool {
        match (self, next) {
            (JobState::Pending, JobState::Running) => true,
            // A pending job cancelled before a worker picked it up.
            (JobState::Pending, JobState::Failed) => true,
            (JobState::Running, JobState::Succeeded | JobState::Failed) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Display, EnumString, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureCause {
    Cancelled,
    Timeout,
    CatalogUnavailable,
    UnknownTable,
    FetchFailed,
    NoLocalFiles,
    TablesFailed,
    Database,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobFailure {
    pub cause: FailureCause,
    pub message: String,
}

impl JobFailure {
    pub fn new(cause: FailureCause, message: impl Into<String>) -> Self {
        Self {
            cause,
            message: message.into(),
        }
    }
}

/// Caller-supplied options; which fields apply depends on the job kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobOptions {
    /// Table subset; `None` means every table in the plan.
    #[serde(default)]
    pub tables: Option<Vec<String>>,

    /// Download: re-fetch files that are already present.
    #[serde(default)]
    pub force: bool,

    /// Import: run full validation after loading.
    #[serde(default = "default_true")]
    pub validate: bool,

    /// Validate: expected row counts per table.
    #[serde(default)]
    pub expected_counts: Option<BTreeMap<String, i64>>,

    /// Overrides the configured job deadline.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            tables: None,
            force: false,
            validate: true,
            expected_counts: None,
            timeout_secs: None,
        }
    }
}

/// Terminal payload, owned by the job once it finishes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "data")]
pub enum JobResult {
    Download(FetchReport),
    Import(DatasetImportResult),
    Validate(ValidationReport),
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("Invalid job transition from {from} to {to}")]
pub struct TransitionError {
    pub from: JobState,
    pub to: JobState,
}

/// An orchestrated unit of pipeline work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    /// Snapshot date for download/import, "database" for validation.
    pub target: String,
    pub options: JobOptions,
    pub state: JobState,
    pub progress: f64,
    pub message: String,
    pub failure: Option<JobFailure>,
    pub result: Option<JobResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(kind: JobKind, target: impl Into<String>, options: JobOptions) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind,
            target: target.into(),
            options,
            state: JobState::Pending,
            progress: 0.0,
            message: "Queued".to_string(),
            failure: None,
            result: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Key under which at most one live job may exist.
    pub fn target_key(&self) -> String {
        target_key(self.kind, &self.target)
    }

    fn transition(&mut self, next: JobState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        let now = Utc::now();
        self.state = next;
        self.updated_at = now;
        if next == JobState::Running {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.transition(JobState::Running)?;
        self.message = format!("Running {}", self.kind);
        Ok(())
    }

    pub fn set_progress(&mut self, fraction: f64, message: impl Into<String>) {
        self.progress = fraction.clamp(0.0, 1.0);
        self.message = message.into();
        self.updated_at = Utc::now();
    }

    pub fn succeed(&mut self, result: JobResult, message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobState::Succeeded)?;
        self.progress = 1.0;
        self.message = message.into();
        self.result = Some(result);
        Ok(())
    }

    /// Fail the job, keeping whatever partial result the stage produced.
    pub fn fail(&mut self, failure: JobFailure, partial: Option<JobResult>) -> Result<(), TransitionError> {
        self.transition(JobState::Failed)?;
        self.message = failure.message.clone();
        self.failure = Some(failure);
        if partial.is_some() {
            self.result = partial;
        }
        Ok(())
    }
}

pub fn target_key(kind: JobKind, target: &str) -> String {
    format!("{kind}:{target}")
}
