//! Job executor
//!
//! A worker pulls one queued job at a time and owns its record until the job
//! is terminal. While the stage runs, a watcher task turns the job's cancel
//! flag and deadline into signals on the cancellation token, and progress
//! reported by the stage is persisted as it arrives.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use uuid::Uuid;

use crate::models::job::{FailureCause, Job, JobFailure, JobState, TransitionError};
use crate::services::cancel::CancellationToken;
use crate::services::job_store::{JobStore, JobStoreError};
use crate::services::pipeline::PipelineStages;
use crate::services::queue::{JobQueue, QueueError, QueuedJob};

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Job store error: {0}")]
    Store(#[from] JobStoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Deadline for jobs that do not set their own.
    pub default_timeout: Duration,
    /// Idle sleep between empty dequeues.
    pub poll_interval: Duration,
    /// How often a running job's cancel flag is read.
    pub cancel_poll_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(1800),
            poll_interval: Duration::from_secs(1),
            cancel_poll_interval: Duration::from_millis(500),
        }
    }
}

pub struct Worker {
    name: String,
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    stages: Arc<dyn PipelineStages>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        stages: Arc<dyn PipelineStages>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            name: name.into(),
            store,
            queue,
            stages,
            settings,
        }
    }

    /// Take one job from the queue and run it to a terminal state.
    ///
    /// Returns `Ok(false)` when the queue was empty.
    pub async fn process_next_job(&self) -> Result<bool, WorkerError> {
        let Some(queued) = self.queue.dequeue().await? else {
            return Ok(false);
        };

        let outcome = self.execute(&queued).await;

        if let Err(e) = self.queue.complete(&queued).await {
            tracing::warn!(job_id = %queued.job_id, error = %e, "Failed to remove job from processing list");
        }

        outcome.map(|_| true)
    }

    /// Process jobs until `shutdown` flips to true or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(worker = %self.name, "Worker ready, starting job processing loop");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.process_next_job().await {
                Ok(true) => {
                    tracing::debug!(worker = %self.name, "Job processed, checking for next job");
                    false
                }
                Ok(false) => {
                    tracing::trace!(worker = %self.name, "No jobs available, sleeping");
                    true
                }
                Err(e) => {
                    tracing::error!(worker = %self.name, error = %e, "Error processing job, will retry");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = sleep(self.settings.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        tracing::info!(worker = %self.name, "Worker stopped");
    }

    async fn execute(&self, queued: &QueuedJob) -> Result<(), WorkerError> {
        let Some(mut job) = self.store.get(queued.job_id).await? else {
            tracing::warn!(job_id = %queued.job_id, "Queued job has no record, dropping");
            return Ok(());
        };

        if job.state != JobState::Pending {
            tracing::warn!(job_id = %job.id, state = %job.state, "Queued job is not pending, dropping");
            return Ok(());
        }

        if self.store.is_cancel_requested(job.id).await? {
            job.fail(JobFailure::new(FailureCause::Cancelled, "Cancelled before start"), None)?;
            return self.finish(&job).await;
        }

        job.start()?;
        self.store.save(&job).await?;
        tracing::info!(
            worker = %self.name,
            job_id = %job.id,
            kind = %job.kind,
            target = %job.target,
            "Job started"
        );

        let token = CancellationToken::new();
        let timeout = job
            .options
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.settings.default_timeout);
        let watcher = tokio::spawn(watch_job(
            self.store.clone(),
            job.id,
            token.clone(),
            timeout,
            self.settings.cancel_poll_interval,
        ));

        let (progress_tx, mut progress_rx) = watch::channel((0.0, job.message.clone()));
        let report = move |fraction: f64, message: String| {
            let _ = progress_tx.send((fraction, message));
        };

        let running = job.clone();
        let stage = self.stages.run(&running, &token, &report);
        tokio::pin!(stage);

        let outcome = loop {
            tokio::select! {
                outcome = &mut stage => break outcome,
                Ok(()) = progress_rx.changed() => {
                    let (fraction, message) = progress_rx.borrow_and_update().clone();
                    job.set_progress(fraction, message);
                    if let Err(e) = self.store.save(&job).await {
                        tracing::warn!(job_id = %job.id, error = %e, "Failed to persist progress");
                    }
                }
            }
        };
        watcher.abort();

        match outcome {
            Ok(success) => job.succeed(success.result, success.message)?,
            Err(failure) => job.fail(failure.failure, failure.partial)?,
        }

        self.finish(&job).await
    }

    /// Persist the terminal record and free the job's target.
    async fn finish(&self, job: &Job) -> Result<(), WorkerError> {
        let saved = self.store.save(job).await;

        if let Err(e) = self.store.release_target(&job.target_key(), job.id).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to release job target");
        }

        match &job.failure {
            None => {
                metrics::counter!("jobs_completed_total", "kind" => job.kind.to_string()).increment(1);
                tracing::info!(job_id = %job.id, kind = %job.kind, message = %job.message, "Job succeeded");
            }
            Some(failure) => {
                metrics::counter!(
                    "jobs_failed_total",
                    "kind" => job.kind.to_string(),
                    "cause" => failure.cause.to_string()
                )
                .increment(1);
                tracing::warn!(
                    job_id = %job.id,
                    kind = %job.kind,
                    cause = %failure.cause,
                    message = %failure.message,
                    "Job failed"
                );
            }
        }

        saved?;
        Ok(())
    }
}

/// Signal the token when the job is cancelled or its deadline passes.
async fn watch_job(
    store: Arc<dyn JobStore>,
    id: Uuid,
    token: CancellationToken,
    timeout: Duration,
    poll_interval: Duration,
) {
    let deadline = sleep(timeout);
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval(poll_interval);

    loop {
        tokio::select! {
            _ = &mut deadline => {
                tracing::warn!(job_id = %id, timeout_secs = timeout.as_secs(), "Job deadline exceeded");
                token.expire();
                return;
            }
            _ = ticker.tick() => {
                match store.is_cancel_requested(id).await {
                    Ok(true) => {
                        tracing::info!(job_id = %id, "Cancel flag observed");
                        token.cancel();
                        return;
                    }
                    Ok(false) => {}
                    Err(e) => tracing::warn!(job_id = %id, error = %e, "Failed to read cancel flag"),
                }
            }
        }
    }
}
