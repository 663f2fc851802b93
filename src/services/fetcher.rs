//! Fetcher
//!
//! Materialises the schema and table files of one snapshot under the data
//! directory. A file that already exists locally is never downloaded again
//! unless the caller forces a refresh. Bodies are streamed to `<name>.part`
//! (bzip2-decoded on the fly) and renamed into place once complete, so a
//! partially written file is never visible under its final name.

use async_compression::tokio::write::BzDecoder;
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, info, warn};

use crate::models::snapshot::{FetchFailure, FetchProgress, FetchReport, FileKind, LocalFile, RemoteFile};
use crate::services::cancel::{CancellationToken, Interrupt};
use crate::services::catalog::{CatalogError, DatasetCatalog};
use crate::services::plan::{ImportPlan, PlanError};
use crate::services::storage::{ObjectStore, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Fetch interrupted: {interrupt}")]
    Interrupted {
        interrupt: Interrupt,
        partial: FetchReport,
    },

    #[error("Data directory error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-file download failure; siblings in the same fetch keep going.
#[derive(Debug, thiserror::Error)]
#[error("Failed to fetch {file}: {cause}")]
pub struct FetchFailed {
    pub file: String,
    #[source]
    pub cause: StorageError,
}

impl From<FetchFailed> for FetchFailure {
    fn from(failed: FetchFailed) -> Self {
        FetchFailure {
            file: failed.file,
            cause: failed.cause.to_string(),
        }
    }
}

/// Serialises work on the same local path across concurrent fetches.
#[derive(Default)]
struct FileLocks {
    inner: Mutex<HashMap<PathBuf, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileLocks {
    async fn lock(&self, path: &Path) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(path.to_path_buf()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

enum FileOutcome {
    Present(LocalFile),
    Failed(FetchFailure),
    NotStarted,
}

pub struct Fetcher {
    store: Arc<dyn ObjectStore>,
    catalog: Arc<DatasetCatalog>,
    plan: ImportPlan,
    data_dir: PathBuf,
    concurrency: usize,
    locks: FileLocks,
}

impl Fetcher {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        catalog: Arc<DatasetCatalog>,
        plan: ImportPlan,
        data_dir: impl Into<PathBuf>,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            catalog,
            plan,
            data_dir: data_dir.into(),
            concurrency: concurrency.max(1),
            locks: FileLocks::default(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Fetch the schema plus one CSV per requested table (all tables by default).
    ///
    /// Per-file failures are collected in the report; only plan, catalog and
    /// interruption errors fail the call as a whole.
    pub async fn fetch(
        &self,
        date: NaiveDate,
        tables: Option<&[String]>,
        force: bool,
        cancel: &CancellationToken,
        progress: &(dyn Fn(FetchProgress) + Send + Sync),
    ) -> Result<FetchReport, FetchError> {
        let tables = self.plan.resolve(tables)?;
        if let Err(interrupt) = cancel.check() {
            return Err(FetchError::Interrupted {
                interrupt,
                partial: FetchReport::default(),
            });
        }
        tokio::fs::create_dir_all(&self.data_dir).await?;

        let wanted: Vec<FileKind> = std::iter::once(FileKind::Schema)
            .chain(tables.iter().map(|t| FileKind::Table(t.name.to_string())))
            .collect();

        let mut report = FetchReport {
            date: Some(date),
            ..Default::default()
        };

        if !force {
            if let Some((files, schema_missing)) = self.all_present(date, &wanted).await {
                info!(date = %date, files = files.len(), "All requested files already present");
                report.files = files;
                report.schema_missing = schema_missing;
                return Ok(report);
            }
        }

        let snapshot = self.catalog.snapshot(date).await?;

        if snapshot.schema().is_some() {
            let _ = tokio::fs::remove_file(self.schema_marker(date)).await;
        }

        let mut remote: Vec<RemoteFile> = Vec::new();
        for kind in &wanted {
            let published = match kind {
                FileKind::Schema => snapshot.schema(),
                FileKind::Table(table) => snapshot.table_file(table),
            };
            match (published, kind) {
                (Some(file), _) => remote.push(file.clone()),
                (None, FileKind::Schema) => {
                    warn!(date = %date, "Snapshot has no schema file");
                    report.schema_missing = true;
                    if let Err(e) = tokio::fs::write(self.schema_marker(date), b"").await {
                        warn!(date = %date, error = %e, "Failed to record missing schema");
                    }
                }
                (None, FileKind::Table(_)) => report.failures.push(FetchFailure {
                    file: kind.local_file_name(date),
                    cause: "not published in this snapshot".to_string(),
                }),
            }
        }

        let total = remote.len();
        let completed = AtomicUsize::new(0);

        let outcomes: Vec<FileOutcome> = stream::iter(remote)
            .map(|file| {
                let completed = &completed;
                async move {
                    if cancel.is_interrupted() {
                        return FileOutcome::NotStarted;
                    }
                    let outcome = match self.fetch_file(&file, force).await {
                        Ok(local) => FileOutcome::Present(local),
                        Err(failed) => {
                            warn!(file = %failed.file, error = %failed.cause, "File fetch failed");
                            FileOutcome::Failed(failed.into())
                        }
                    };
                    progress(FetchProgress {
                        file: file.local_file_name(),
                        completed: completed.fetch_add(1, Ordering::SeqCst) + 1,
                        total,
                    });
                    outcome
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut not_started = 0;
        for outcome in outcomes {
            match outcome {
                FileOutcome::Present(local) => report.files.push(local),
                FileOutcome::Failed(failure) => report.failures.push(failure),
                FileOutcome::NotStarted => not_started += 1,
            }
        }
        report.files.sort_by_key(|f| self.file_rank(&f.kind));

        if let Err(interrupt) = cancel.check() {
            info!(date = %date, not_started, "Fetch interrupted");
            return Err(FetchError::Interrupted {
                interrupt,
                partial: report,
            });
        }

        info!(
            date = %date,
            present = report.files.len(),
            downloaded = report.downloaded_count(),
            failed = report.failures.len(),
            "Fetch complete"
        );

        Ok(report)
    }

    /// Marks a snapshot known to be published without a schema file.
    fn schema_marker(&self, date: NaiveDate) -> PathBuf {
        self.data_dir
            .join(format!("schema-{}.missing", date.format("%Y-%m-%d")))
    }

    /// Local files for every wanted kind, or `None` if any is missing.
    ///
    /// A schema recorded as unpublished counts as present; the flag says so.
    async fn all_present(&self, date: NaiveDate, wanted: &[FileKind]) -> Option<(Vec<LocalFile>, bool)> {
        let mut files = Vec::with_capacity(wanted.len());
        let mut schema_missing = false;
        for kind in wanted {
            let path = self.data_dir.join(kind.local_file_name(date));
            let size = match existing_size(&path).await {
                Some(size) => size,
                None if *kind == FileKind::Schema
                    && existing_size(&self.schema_marker(date)).await.is_some() =>
                {
                    schema_missing = true;
                    continue;
                }
                None => return None,
            };
            files.push(LocalFile {
                kind: kind.clone(),
                path,
                size,
                downloaded: false,
            });
        }
        Some((files, schema_missing))
    }

    async fn fetch_file(&self, file: &RemoteFile, force: bool) -> Result<LocalFile, FetchFailed> {
        let name = file.local_file_name();
        let path = self.data_dir.join(&name);
        let fail = |cause: StorageError| FetchFailed {
            file: name.clone(),
            cause,
        };

        let _guard = self.locks.lock(&path).await;

        if !force {
            if let Some(size) = existing_size(&path).await {
                debug!(file = %name, "Already present, skipping download");
                return Ok(LocalFile {
                    kind: file.kind.clone(),
                    path,
                    size,
                    downloaded: false,
                });
            }
        }

        let part = part_path(&path);
        if let Err(e) = self.download_to(file, &part).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(fail(e));
        }
        tokio::fs::rename(&part, &path)
            .await
            .map_err(|e| fail(e.into()))?;

        let size = tokio::fs::metadata(&path)
            .await
            .map_err(|e| fail(e.into()))?
            .len();

        metrics::counter!("fetch_files_downloaded_total").increment(1);
        info!(key = %file.key, file = %name, bytes = size, "Downloaded");

        Ok(LocalFile {
            kind: file.kind.clone(),
            path,
            size,
            downloaded: true,
        })
    }

    async fn download_to(&self, file: &RemoteFile, part: &Path) -> Result<(), StorageError> {
        let handle = tokio::fs::File::create(part).await?;
        let mut writer: Box<dyn AsyncWrite + Send + Unpin> = if file.compressed {
            Box::new(BzDecoder::new(BufWriter::new(handle)))
        } else {
            Box::new(BufWriter::new(handle))
        };

        self.store.get_to_writer(&file.key, &mut *writer).await?;
        writer.shutdown().await?;
        Ok(())
    }

    fn file_rank(&self, kind: &FileKind) -> usize {
        match kind {
            FileKind::Schema => 0,
            FileKind::Table(table) => self.plan.position(table).map_or(usize::MAX, |p| p + 1),
        }
    }
}

async fn existing_size(path: &Path) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        _ => None,
    }
}

fn part_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::MemoryObjectStore;

    const PEOPLE_CSV: &str = "id,name_first,name_last\n1,John,Jay\n2,John,Rutledge\n";

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 10, 31).unwrap()
    }

    fn setup(dir: &Path) -> (Arc<MemoryObjectStore>, Fetcher) {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("bulk-data/schema-2024-10-31.sql", b"CREATE TABLE people_db_person ();".to_vec());
        store.insert("bulk-data/people-db-people-2024-10-31.csv", PEOPLE_CSV.as_bytes().to_vec());
        store.insert("bulk-data/courts-2024-10-31.csv", b"id,full_name\nscotus,Supreme Court\n".to_vec());

        let catalog = Arc::new(DatasetCatalog::new(
            store.clone(),
            "bulk-data/",
            ImportPlan::people_db(),
        ));
        let fetcher = Fetcher::new(store.clone(), catalog, ImportPlan::people_db(), dir, 2);
        (store, fetcher)
    }

    fn no_progress(_: FetchProgress) {}

    #[tokio::test]
    async fn test_fetch_then_refetch_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (store, fetcher) = setup(dir.path());
        let tables = vec!["people_db_person".to_string()];
        let token = CancellationToken::new();

        let first = fetcher
            .fetch(date(), Some(&tables), false, &token, &no_progress)
            .await
            .unwrap();
        assert_eq!(first.files.len(), 2);
        assert_eq!(first.downloaded_count(), 2);
        assert_eq!(store.download_count(), 2);

        let contents = std::fs::read_to_string(dir.path().join("people_db_person-2024-10-31.csv")).unwrap();
        assert_eq!(contents, PEOPLE_CSV);

        let second = fetcher
            .fetch(date(), Some(&tables), false, &token, &no_progress)
            .await
            .unwrap();
        assert_eq!(store.download_count(), 2);
        assert_eq!(second.downloaded_count(), 0);
        let first_paths: Vec<_> = first.files.iter().map(|f| &f.path).collect();
        let second_paths: Vec<_> = second.files.iter().map(|f| &f.path).collect();
        assert_eq!(first_paths, second_paths);
    }

    #[tokio::test]
    async fn test_force_redownloads() {
        let dir = tempfile::tempdir().unwrap();
        let (store, fetcher) = setup(dir.path());
        let tables = vec!["people_db_court".to_string()];
        let token = CancellationToken::new();

        fetcher.fetch(date(), Some(&tables), false, &token, &no_progress).await.unwrap();
        let report = fetcher.fetch(date(), Some(&tables), true, &token, &no_progress).await.unwrap();
        assert_eq!(report.downloaded_count(), 2);
        assert_eq!(store.download_count(), 4);
    }

    #[tokio::test]
    async fn test_missing_table_is_reported_without_aborting_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let (_, fetcher) = setup(dir.path());
        let tables = vec!["people_db_person".to_string(), "people_db_race".to_string()];

        let report = fetcher
            .fetch(date(), Some(&tables), false, &CancellationToken::new(), &no_progress)
            .await
            .unwrap();

        assert!(report.has_table("people_db_person"));
        assert!(!report.has_table("people_db_race"));
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].file, "people_db_race-2024-10-31.csv");
    }

    #[tokio::test]
    async fn test_unknown_table_fails_before_any_download() {
        let dir = tempfile::tempdir().unwrap();
        let (store, fetcher) = setup(dir.path());
        let tables = vec!["search_docket".to_string()];

        let err = fetcher
            .fetch(date(), Some(&tables), false, &CancellationToken::new(), &no_progress)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Plan(PlanError::UnknownTable(_))));
        assert_eq!(store.download_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_fetch_downloads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (store, fetcher) = setup(dir.path());
        let token = CancellationToken::new();
        token.cancel();

        let err = fetcher.fetch(date(), None, false, &token, &no_progress).await.unwrap_err();
        assert!(matches!(err, FetchError::Interrupted { interrupt: Interrupt::Cancelled, .. }));
        assert_eq!(store.download_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_download_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let (_, fetcher) = setup(dir.path());
        let remote = RemoteFile {
            key: "bulk-data/people-db-races-2024-10-31.csv".to_string(),
            date: date(),
            kind: FileKind::Table("people_db_race".to_string()),
            size: 10,
            last_modified: None,
            compressed: false,
        };

        let err = fetcher.fetch_file(&remote, false).await.unwrap_err();
        assert_eq!(err.file, "people_db_race-2024-10-31.csv");
        assert!(!dir.path().join("people_db_race-2024-10-31.csv").exists());
        assert!(!dir.path().join("people_db_race-2024-10-31.csv.part").exists());
    }

    #[tokio::test]
    async fn test_progress_reports_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let (_, fetcher) = setup(dir.path());
        let seen = Mutex::new(Vec::new());
        let record = |p: FetchProgress| seen.lock().unwrap().push(p.completed);

        let tables = vec!["people_db_court".to_string(), "people_db_person".to_string()];
        fetcher
            .fetch(date(), Some(&tables), false, &CancellationToken::new(), &record)
            .await
            .unwrap();

        let mut seen = seen.into_inner().unwrap();
        seen.sort();
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_refetch_without_published_schema_stays_local() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("bulk-data/people-db-people-2024-10-31.csv", PEOPLE_CSV.as_bytes().to_vec());
        let catalog = Arc::new(DatasetCatalog::new(store.clone(), "bulk-data/", ImportPlan::people_db()));
        let fetcher = Fetcher::new(store.clone(), catalog, ImportPlan::people_db(), dir.path(), 2);
        let tables = vec!["people_db_person".to_string()];
        let token = CancellationToken::new();

        let first = fetcher
            .fetch(date(), Some(&tables), false, &token, &no_progress)
            .await
            .unwrap();
        assert!(first.schema_missing);
        assert_eq!(first.files.len(), 1);

        store.set_unavailable(true);
        let second = fetcher
            .fetch(date(), Some(&tables), false, &token, &no_progress)
            .await
            .unwrap();
        assert!(second.schema_missing);
        assert_eq!(second.downloaded_count(), 0);
        assert_eq!(second.files, first.files.iter().map(|f| LocalFile { downloaded: false, ..f.clone() }).collect::<Vec<_>>());
        assert_eq!(store.download_count(), 1);
    }

    #[tokio::test]
    async fn test_schema_published_later_replaces_marker() {
        let dir = tempfile::tempdir().unwrap();
        let (store, fetcher) = setup(dir.path());
        std::fs::write(dir.path().join("schema-2024-10-31.missing"), b"").unwrap();
        let tables = vec!["people_db_court".to_string()];

        let report = fetcher
            .fetch(date(), Some(&tables), true, &CancellationToken::new(), &no_progress)
            .await
            .unwrap();

        assert!(!report.schema_missing);
        assert!(dir.path().join("schema-2024-10-31.sql").exists());
        assert!(!dir.path().join("schema-2024-10-31.missing").exists());
        assert_eq!(store.download_count(), 2);
    }

    #[test]
    fn test_part_path() {
        let path = Path::new("/data/people_db_person-2024-10-31.csv");
        assert_eq!(part_path(path), PathBuf::from("/data/people_db_person-2024-10-31.csv.part"));
    }
}
