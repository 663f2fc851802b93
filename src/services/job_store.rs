//! Job records and their per-target claims.
//!
//! Jobs are stored as JSON under `cl_loader:job:{id}` with a TTL refreshed on
//! every write. Cancel requests live under their own key so a worker saving
//! progress can never overwrite one. A target claim (`SET NX`) guarantees at
//! most one live job per kind and target.

use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::models::job::Job;

const JOB_PREFIX: &str = "cl_loader:job:";
const CANCEL_PREFIX: &str = "cl_loader:cancel:";
const TARGET_PREFIX: &str = "cl_loader:target:";
const CLAIM_ATTEMPTS: usize = 2;

/// Deletes the claim only if it still belongs to the releasing job.
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Job {0} already exists")]
    Duplicate(Uuid),

    #[error("Corrupt claim value: {0}")]
    CorruptClaim(String),

    #[error("Claim on {0} kept expiring before its holder could be read")]
    ClaimContended(String),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job; fails if the id is taken.
    async fn create(&self, job: &Job) -> Result<(), JobStoreError>;

    /// Overwrite a job record and refresh its TTL.
    async fn save(&self, job: &Job) -> Result<(), JobStoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Job>, JobStoreError>;

    async fn request_cancel(&self, id: Uuid) -> Result<(), JobStoreError>;

    async fn is_cancel_requested(&self, id: Uuid) -> Result<bool, JobStoreError>;

    /// Claim a target for a job. Returns the current holder if already claimed.
    async fn try_claim_target(&self, key: &str, id: Uuid) -> Result<Option<Uuid>, JobStoreError>;

    /// Release a claim held by `id`; a claim held by another job is left alone.
    async fn release_target(&self, key: &str, id: Uuid) -> Result<(), JobStoreError>;
}

pub struct RedisJobStore {
    client: redis::Client,
    ttl: Duration,
}

impl RedisJobStore {
    pub fn new(redis_url: &str, ttl: Duration) -> Result<Self, JobStoreError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client, ttl })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, JobStoreError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn create(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job)?;
        let created: Option<String> = redis::cmd("SET")
            .arg(format!("{JOB_PREFIX}{}", job.id))
            .arg(payload)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs())
            .query_async(&mut conn)
            .await?;

        match created {
            Some(_) => Ok(()),
            None => Err(JobStoreError::Duplicate(job.id)),
        }
    }

    async fn save(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job)?;
        conn.set_ex::<_, _, ()>(format!("{JOB_PREFIX}{}", job.id), payload, self.ttl_secs())
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, JobStoreError> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn.get(format!("{JOB_PREFIX}{id}")).await?;
        match payload {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn request_cancel(&self, id: Uuid) -> Result<(), JobStoreError> {
        let mut conn = self.connection().await?;
        conn.set_ex::<_, _, ()>(format!("{CANCEL_PREFIX}{id}"), "1", self.ttl_secs())
            .await?;
        Ok(())
    }

    async fn is_cancel_requested(&self, id: Uuid) -> Result<bool, JobStoreError> {
        let mut conn = self.connection().await?;
        Ok(conn.exists(format!("{CANCEL_PREFIX}{id}")).await?)
    }

    async fn try_claim_target(&self, key: &str, id: Uuid) -> Result<Option<Uuid>, JobStoreError> {
        let mut conn = self.connection().await?;
        let claim_key = format!("{TARGET_PREFIX}{key}");
        for _ in 0..CLAIM_ATTEMPTS {
            let claimed: Option<String> = redis::cmd("SET")
                .arg(&claim_key)
                .arg(id.to_string())
                .arg("NX")
                .arg("EX")
                .arg(self.ttl_secs())
                .query_async(&mut conn)
                .await?;
            if claimed.is_some() {
                return Ok(None);
            }

            let holder: Option<String> = conn.get(&claim_key).await?;
            if let Some(holder) = holder {
                return parse_holder(holder).map(Some);
            }
            debug!(key, "Claim expired before its holder was read; retrying");
        }
        Err(JobStoreError::ClaimContended(key.to_string()))
    }

    async fn release_target(&self, key: &str, id: Uuid) -> Result<(), JobStoreError> {
        let mut conn = self.connection().await?;
        let _released: i64 = redis::Script::new(RELEASE_SCRIPT)
            .key(format!("{TARGET_PREFIX}{key}"))
            .arg(id.to_string())
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}

fn parse_holder(holder: String) -> Result<Uuid, JobStoreError> {
    Uuid::parse_str(&holder).map_err(|_| JobStoreError::CorruptClaim(holder))
}

/// Every entry carries its expiry instant.
#[derive(Default)]
struct MemoryState {
    jobs: HashMap<Uuid, (Job, Instant)>,
    cancelled: HashMap<Uuid, Instant>,
    targets: HashMap<String, (Uuid, Instant)>,
}

impl MemoryState {
    fn sweep(&mut self, now: Instant) {
        self.jobs.retain(|_, (_, expires)| *expires > now);
        self.cancelled.retain(|_, expires| *expires > now);
        self.targets.retain(|_, (_, expires)| *expires > now);
    }
}

/// Single-process store with the same TTL semantics as the Redis one.
pub struct InMemoryJobStore {
    state: Mutex<MemoryState>,
    ttl: Duration,
}

impl InMemoryJobStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            ttl,
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.sweep(now);
        if state.jobs.contains_key(&job.id) {
            return Err(JobStoreError::Duplicate(job.id));
        }
        state.jobs.insert(job.id, (job.clone(), now + self.ttl));
        Ok(())
    }

    async fn save(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut state = self.state.lock().await;
        state.jobs.insert(job.id, (job.clone(), Instant::now() + self.ttl));
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, JobStoreError> {
        let mut state = self.state.lock().await;
        match state.jobs.get(&id) {
            Some((job, expires)) if *expires > Instant::now() => Ok(Some(job.clone())),
            Some(_) => {
                state.jobs.remove(&id);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn request_cancel(&self, id: Uuid) -> Result<(), JobStoreError> {
        let expires = Instant::now() + self.ttl;
        self.state.lock().await.cancelled.insert(id, expires);
        Ok(())
    }

    async fn is_cancel_requested(&self, id: Uuid) -> Result<bool, JobStoreError> {
        let state = self.state.lock().await;
        Ok(matches!(state.cancelled.get(&id), Some(expires) if *expires > Instant::now()))
    }

    async fn try_claim_target(&self, key: &str, id: Uuid) -> Result<Option<Uuid>, JobStoreError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.sweep(now);
        if let Some((holder, _)) = state.targets.get(key) {
            return Ok(Some(*holder));
        }
        state.targets.insert(key.to_string(), (id, now + self.ttl));
        Ok(None)
    }

    async fn release_target(&self, key: &str, id: Uuid) -> Result<(), JobStoreError> {
        let mut state = self.state.lock().await;
        if matches!(state.targets.get(key), Some((holder, _)) if *holder == id) {
            state.targets.remove(key);
        }
        Ok(())
    }
}
