use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for the job queue and job store
    pub redis_url: String,

    /// Directory holding downloaded schema and CSV files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Public bulk-data bucket
    #[serde(default = "default_s3_bucket")]
    pub s3_bucket: String,

    /// Key prefix under which snapshots are published
    #[serde(default = "default_s3_prefix")]
    pub s3_prefix: String,

    #[serde(default = "default_s3_region")]
    pub s3_region: String,

    /// Custom S3-compatible endpoint (mirrors, local testing)
    #[serde(default)]
    pub s3_endpoint: Option<String>,

    /// Parallel file downloads per fetch
    #[serde(default = "default_fetch_concurrency")]
    pub fetch_concurrency: usize,

    /// Rows per INSERT statement during table import
    #[serde(default = "default_import_batch_size")]
    pub import_batch_size: usize,

    /// Default job deadline in seconds
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Retention of job records in the job store
    #[serde(default = "default_job_ttl_secs")]
    pub job_ttl_secs: u64,

    /// Executor loops per worker process
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Maximum offending identifiers listed per validation check
    #[serde(default = "default_validation_report_limit")]
    pub validation_report_limit: i64,

    /// Worker idle poll interval
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Upper bound on pooled Postgres connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_s3_bucket() -> String {
    "com-courtlistener-storage".to_string()
}

fn default_s3_prefix() -> String {
    "bulk-data/".to_string()
}

fn default_s3_region() -> String {
    "us-west-2".to_string()
}

fn default_fetch_concurrency() -> usize {
    4
}

fn default_import_batch_size() -> usize {
    1000
}

fn default_job_timeout_secs() -> u64 {
    30 * 60
}

fn default_job_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_worker_concurrency() -> usize {
    2
}

fn default_validation_report_limit() -> i64 {
    100
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_db_max_connections() -> u32 {
    10
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_optional_fields() {
        let vars = vec![
            ("DATABASE_URL".to_string(), "postgres://localhost/cl".to_string()),
            ("REDIS_URL".to_string(), "redis://localhost:6379".to_string()),
        ];
        let config: AppConfig = envy::from_iter(vars).unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:3000");
        assert_eq!(config.s3_bucket, "com-courtlistener-storage");
        assert_eq!(config.s3_prefix, "bulk-data/");
        assert_eq!(config.fetch_concurrency, 4);
        assert!(config.s3_endpoint.is_none());
        assert_eq!(config.job_timeout(), Duration::from_secs(1800));
    }

    #[test]
    fn test_overrides_are_parsed() {
        let vars = vec![
            ("DATABASE_URL".to_string(), "postgres://localhost/cl".to_string()),
            ("REDIS_URL".to_string(), "redis://localhost:6379".to_string()),
            ("S3_ENDPOINT".to_string(), "http://localhost:9000".to_string()),
            ("WORKER_CONCURRENCY".to_string(), "6".to_string()),
        ];
        let config: AppConfig = envy::from_iter(vars).unwrap();

        assert_eq!(config.s3_endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.worker_concurrency, 6);
    }
}
