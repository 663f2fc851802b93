use async_trait::async_trait;
use s3::creds::Credentials;
use s3::{Bucket, Region};
use tokio::io::AsyncWrite;

/// Listing entry for one stored object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectMeta {
    pub key: String,
    pub size: u64,
    /// RFC 3339 timestamp as reported by the store.
    pub last_modified: String,
}

/// Read-only access to the bulk-data bucket.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every object under `prefix`. Pagination is handled inside; the
    /// call returns the complete listing or an error.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StorageError>;

    /// Stream the object body into `writer`.
    async fn get_to_writer(
        &self,
        key: &str,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), StorageError>;
}

/// Client for the public CourtListener bucket (unsigned S3 requests).
pub struct S3BucketStore {
    bucket: Box<Bucket>,
}

impl S3BucketStore {
    pub fn new(bucket_name: &str, region: &str, endpoint: Option<&str>) -> Result<Self, StorageError> {
        let region = match endpoint {
            Some(endpoint) => Region::Custom {
                region: region.to_string(),
                endpoint: endpoint.to_string(),
            },
            None => region
                .parse::<Region>()
                .map_err(|e| StorageError::Config(e.to_string()))?,
        };

        let credentials =
            Credentials::anonymous().map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket })
    }
}

#[async_trait]
impl ObjectStore for S3BucketStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StorageError> {
        let pages = self
            .bucket
            .list(prefix.to_string(), None)
            .await
            .map_err(StorageError::S3)?;

        Ok(pages
            .into_iter()
            .flat_map(|page| page.contents)
            .map(|object| ObjectMeta {
                key: object.key,
                size: object.size,
                last_modified: object.last_modified,
            })
            .collect())
    }

    async fn get_to_writer(
        &self,
        key: &str,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), StorageError> {
        let mut writer = writer;
        let status = self
            .bucket
            .get_object_to_writer(key, &mut writer)
            .await
            .map_err(StorageError::S3)?;

        if !(200..300).contains(&status) {
            return Err(StorageError::Status {
                key: key.to_string(),
                code: status,
            });
        }
        Ok(())
    }
}

/// In-process object store used by tests and offline runs.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: std::sync::Mutex<std::collections::BTreeMap<String, Vec<u8>>>,
    downloads: std::sync::atomic::AtomicUsize,
    unavailable: std::sync::atomic::AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, body: impl Into<Vec<u8>>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(key.into(), body.into());
        }
    }

    /// Number of object bodies served so far.
    pub fn download_count(&self) -> usize {
        self.downloads.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Make every subsequent call fail as if the bucket were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable
            .store(unavailable, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StorageError> {
        if self.unavailable.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StorageError::Config("bucket unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>, StorageError> {
        self.check_available()?;
        let objects = self
            .objects
            .lock()
            .map_err(|_| StorageError::Config("object map poisoned".to_string()))?;

        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, body)| ObjectMeta {
                key: key.clone(),
                size: body.len() as u64,
                last_modified: "2024-11-01T00:00:00.000Z".to_string(),
            })
            .collect())
    }

    async fn get_to_writer(
        &self,
        key: &str,
        writer: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> Result<(), StorageError> {
        use tokio::io::AsyncWriteExt;

        self.check_available()?;
        let body = {
            let objects = self
                .objects
                .lock()
                .map_err(|_| StorageError::Config("object map poisoned".to_string()))?;
            objects
                .get(key)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(key.to_string()))?
        };

        self.downloads
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        writer.write_all(&body).await?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Object {key} returned HTTP {code}")]
    Status { key: String, code: u16 },

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
