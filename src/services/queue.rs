use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::job::JobKind;

const QUEUE_KEY: &str = "cl_loader:queue";
const PROCESSING_KEY: &str = "cl_loader:processing";

/// Queue payload; the job record itself lives in the job store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedJob {
    pub job_id: Uuid,
    pub kind: JobKind,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &QueuedJob) -> Result<(), QueueError>;

    /// Take the oldest job, if any, moving it to the processing list.
    async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueError>;

    /// Remove a finished job from the processing list.
    async fn complete(&self, job: &QueuedJob) -> Result<(), QueueError>;

    async fn queue_depth(&self) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Redis list-backed queue shared by the server and the workers.
pub struct RedisJobQueue {
    client: redis::Client,
}

impl RedisJobQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let result: Option<String> = conn
            .rpoplpush(QUEUE_KEY, PROCESSING_KEY)
            .await
            .map_err(QueueError::Redis)?;

        match result {
            Some(payload) => Ok(Some(serde_json::from_str(&payload).map_err(QueueError::Serialize)?)),
            None => Ok(None),
        }
    }

    async fn complete(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let payload = serde_json::to_string(job).map_err(QueueError::Serialize)?;
        conn.lrem::<_, _, ()>(PROCESSING_KEY, 1, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn queue_depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let depth: u64 = conn.llen(QUEUE_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

/// FIFO queue for single-process runs and tests.
#[derive(Default)]
pub struct InMemoryJobQueue {
    pending: Mutex<VecDeque<QueuedJob>>,
    processing: Mutex<Vec<QueuedJob>>,
}

impl InMemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn processing_len(&self) -> usize {
        self.processing.lock().await.len()
    }
}

#[async_trait]
impl JobQueue for InMemoryJobQueue {
    async fn enqueue(&self, job: &QueuedJob) -> Result<(), QueueError> {
        self.pending.lock().await.push_back(job.clone());
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<QueuedJob>, QueueError> {
        let next = self.pending.lock().await.pop_front();
        if let Some(job) = &next {
            self.processing.lock().await.push(job.clone());
        }
        Ok(next)
    }

    async fn complete(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut processing = self.processing.lock().await;
        if let Some(index) = processing.iter().position(|j| j == job) {
            processing.remove(index);
        }
        Ok(())
    }

    async fn queue_depth(&self) -> Result<u64, QueueError> {
        Ok(self.pending.lock().await.len() as u64)
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
