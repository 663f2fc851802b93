use chrono::{DateTime, NaiveDate, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::models::job::{Job, JobFailure, JobKind, JobOptions, JobResult, JobState};
use crate::models::snapshot::Snapshot;

/// Request to start a pipeline job.
#[derive(Debug, Deserialize, Validate)]
pub struct JobRequest {
    #[garde(skip)]
    pub kind: JobKind,

    /// Snapshot date (YYYY-MM-DD); ignored for validation jobs.
    #[garde(length(min = 10, max = 10))]
    pub date: Option<String>,

    #[garde(skip)]
    #[serde(default)]
    pub options: JobOptions,
}

/// Response after enqueuing a job.
#[derive(Debug, Serialize)]
pub struct JobCreatedResponse {
    pub job_id: Uuid,
    pub status: JobState,
    pub message: String,
}

/// Response for querying job status.
#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub kind: JobKind,
    pub target: String,
    pub status: JobState,
    pub progress: f64,
    pub message: String,
    pub cancel_requested: bool,
    pub failure: Option<JobFailure>,
    pub result: Option<JobResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatusResponse {
    pub fn from_job(job: Job, cancel_requested: bool) -> Self {
        Self {
            job_id: job.id,
            kind: job.kind,
            target: job.target,
            status: job.state,
            progress: job.progress,
            message: job.message,
            cancel_requested,
            failure: job.failure,
            result: job.result,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

/// Snapshots available upstream, newest first.
#[derive(Debug, Serialize)]
pub struct DatasetsResponse {
    pub dates: Vec<NaiveDate>,
    pub snapshots: Vec<Snapshot>,
}

/// Current row counts of the plan tables.
#[derive(Debug, Serialize)]
pub struct DatabaseStatusResponse {
    pub tables: BTreeMap<String, i64>,
    pub total_rows: i64,
}
