//! Job orchestrator
//!
//! The API-facing side of job handling: creates jobs, rejects a second live
//! job for the same kind and target, reports status and records cancel
//! requests. Execution belongs to the worker.

use chrono::NaiveDate;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::api::JobStatusResponse;
use crate::models::job::{Job, JobKind, JobOptions};
use crate::services::job_store::{JobStore, JobStoreError};
use crate::services::plan::{ImportPlan, PlanError};
use crate::services::queue::{JobQueue, QueueError, QueuedJob};

/// Target of validation jobs, which run against the whole database.
pub const DATABASE_TARGET: &str = "database";

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("A {kind} job for {target} is already pending or running ({holder})")]
    AlreadyRunning {
        kind: JobKind,
        target: String,
        holder: Uuid,
    },

    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {0} has already finished")]
    AlreadyFinished(Uuid),

    #[error("Invalid target {target:?}: {reason}")]
    InvalidTarget { target: String, reason: String },

    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error("Job store error: {0}")]
    Store(#[from] JobStoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

pub struct JobOrchestrator {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    plan: ImportPlan,
}

impl JobOrchestrator {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn JobQueue>, plan: ImportPlan) -> Self {
        Self { store, queue, plan }
    }

    /// Normalise and check the target of a new job.
    pub fn resolve_target(kind: JobKind, target: Option<&str>) -> Result<String, JobError> {
        match kind {
            JobKind::Validate => Ok(DATABASE_TARGET.to_string()),
            JobKind::Download | JobKind::Import => {
                let target = target.ok_or_else(|| JobError::InvalidTarget {
                    target: String::new(),
                    reason: format!("{kind} jobs need a snapshot date"),
                })?;
                let date = NaiveDate::parse_from_str(target, "%Y-%m-%d").map_err(|e| {
                    JobError::InvalidTarget {
                        target: target.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(date.format("%Y-%m-%d").to_string())
            }
        }
    }

    /// Create a job and queue it for a worker.
    pub async fn enqueue(
        &self,
        kind: JobKind,
        target: Option<&str>,
        options: JobOptions,
    ) -> Result<Job, JobError> {
        let target = Self::resolve_target(kind, target)?;
        if let Some(tables) = &options.tables {
            self.plan.resolve(Some(tables.as_slice()))?;
        }

        let job = Job::new(kind, target, options);
        let key = job.target_key();

        if let Some(holder) = self.store.try_claim_target(&key, job.id).await? {
            tracing::info!(%kind, target = %job.target, %holder, "Rejected duplicate job");
            return Err(JobError::AlreadyRunning {
                kind,
                target: job.target,
                holder,
            });
        }

        if let Err(e) = self.store.create(&job).await {
            self.release_quietly(&key, job.id).await;
            return Err(e.into());
        }

        let queued = QueuedJob {
            job_id: job.id,
            kind,
        };
        if let Err(e) = self.queue.enqueue(&queued).await {
            // The record stays pending but no worker will see it; free the target.
            self.release_quietly(&key, job.id).await;
            return Err(e.into());
        }

        metrics::counter!("jobs_enqueued_total", "kind" => kind.to_string()).increment(1);
        tracing::info!(job_id = %job.id, %kind, target = %job.target, "Job enqueued");

        Ok(job)
    }

    pub async fn get_status(&self, id: Uuid) -> Result<JobStatusResponse, JobError> {
        let job = self.store.get(id).await?.ok_or(JobError::NotFound(id))?;
        let cancel_requested = self.store.is_cancel_requested(id).await?;
        Ok(JobStatusResponse::from_job(job, cancel_requested))
    }

    /// Flag a pending or running job for cancellation.
    ///
    /// The worker owning the job observes the flag at its next checkpoint and
    /// fails the job with cause `cancelled`.
    pub async fn cancel(&self, id: Uuid) -> Result<JobStatusResponse, JobError> {
        let job = self.store.get(id).await?.ok_or(JobError::NotFound(id))?;
        if job.state.is_terminal() {
            return Err(JobError::AlreadyFinished(id));
        }

        self.store.request_cancel(id).await?;
        tracing::info!(job_id = %id, state = %job.state, "Cancellation requested");

        Ok(JobStatusResponse::from_job(job, true))
    }

    pub async fn queue_depth(&self) -> Result<u64, JobError> {
        Ok(self.queue.queue_depth().await?)
    }

    async fn release_quietly(&self, key: &str, id: Uuid) {
        if let Err(e) = self.store.release_target(key, id).await {
            tracing::warn!(job_id = %id, error = %e, "Failed to release job target");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::job::JobState;
    use crate::services::job_store::InMemoryJobStore;
    use crate::services::queue::InMemoryJobQueue;
    use std::time::Duration;

    fn orchestrator() -> (Arc<InMemoryJobStore>, Arc<InMemoryJobQueue>, JobOrchestrator) {
        let store = Arc::new(InMemoryJobStore::new(Duration::from_secs(60)));
        let queue = Arc::new(InMemoryJobQueue::new());
        let orchestrator = JobOrchestrator::new(store.clone(), queue.clone(), ImportPlan::people_db());
        (store, queue, orchestrator)
    }

    #[test]
    fn test_resolve_target() {
        assert_eq!(
            JobOrchestrator::resolve_target(JobKind::Import, Some("2024-10-31")).unwrap(),
            "2024-10-31"
        );
        assert_eq!(
            JobOrchestrator::resolve_target(JobKind::Validate, Some("ignored")).unwrap(),
            DATABASE_TARGET
        );
        assert!(matches!(
            JobOrchestrator::resolve_target(JobKind::Download, Some("2024-02-30")),
            Err(JobError::InvalidTarget { .. })
        ));
        assert!(JobOrchestrator::resolve_target(JobKind::Download, None).is_err());
    }

    #[tokio::test]
    async fn test_second_job_for_same_target_is_rejected() {
        let (_, queue, orchestrator) = orchestrator();

        let first = orchestrator
            .enqueue(JobKind::Import, Some("2024-10-31"), JobOptions::default())
            .await
            .unwrap();
        let err = orchestrator
            .enqueue(JobKind::Import, Some("2024-10-31"), JobOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, JobError::AlreadyRunning { holder, .. } if holder == first.id));
        assert_eq!(queue.queue_depth().await.unwrap(), 1);

        // Different kind, same date: independent target.
        orchestrator
            .enqueue(JobKind::Download, Some("2024-10-31"), JobOptions::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_table_is_rejected_before_anything_is_stored() {
        let (_, queue, orchestrator) = orchestrator();
        let options = JobOptions {
            tables: Some(vec!["people_db_person".to_string(), "search_docket".to_string()]),
            ..Default::default()
        };

        let err = orchestrator
            .enqueue(JobKind::Import, Some("2024-10-31"), options)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::Plan(PlanError::UnknownTable(_))));
        assert_eq!(queue.queue_depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_status_and_cancel() {
        let (store, _, orchestrator) = orchestrator();
        let job = orchestrator
            .enqueue(JobKind::Validate, None, JobOptions::default())
            .await
            .unwrap();

        let status = orchestrator.get_status(job.id).await.unwrap();
        assert_eq!(status.status, JobState::Pending);
        assert!(!status.cancel_requested);

        let status = orchestrator.cancel(job.id).await.unwrap();
        assert!(status.cancel_requested);
        assert!(store.is_cancel_requested(job.id).await.unwrap());

        assert!(matches!(
            orchestrator.get_status(Uuid::new_v4()).await,
            Err(JobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_finished_job_is_rejected() {
        let (store, _, orchestrator) = orchestrator();
        let mut job = orchestrator
            .enqueue(JobKind::Validate, None, JobOptions::default())
            .await
            .unwrap();
        job.start().unwrap();
        job.fail(
            crate::models::job::JobFailure::new(crate::models::job::FailureCause::Internal, "boom"),
            None,
        )
        .unwrap();
        store.save(&job).await.unwrap();

        assert!(matches!(
            orchestrator.cancel(job.id).await,
            Err(JobError::AlreadyFinished(_))
        ));
    }
}
