//! Dataset catalog
//!
//! Enumerates the snapshots published in the bulk-data bucket. Keys follow
//! `{prefix}{name}-{YYYY-MM-DD}.{csv|sql}[.bz2]`; objects whose name carries
//! no parseable date, or that belong to another table family, are ignored.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::models::snapshot::{FileKind, RemoteFile, Snapshot};
use crate::services::plan::ImportPlan;
use crate::services::storage::{ObjectMeta, ObjectStore, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Remote catalog unavailable: {0}")]
    Unavailable(#[from] StorageError),
}

pub struct DatasetCatalog {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    plan: ImportPlan,
}

impl DatasetCatalog {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>, plan: ImportPlan) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            plan,
        }
    }

    /// All published snapshots, most recent first.
    pub async fn list_snapshots(&self) -> Result<Vec<Snapshot>, CatalogError> {
        let objects = self.store.list(&self.prefix).await?;

        let mut by_date: BTreeMap<NaiveDate, Vec<RemoteFile>> = BTreeMap::new();
        for object in &objects {
            if let Some(file) = self.parse_remote_file(object) {
                by_date.entry(file.date).or_default().push(file);
            }
        }

        let snapshots: Vec<Snapshot> = by_date
            .into_iter()
            .rev()
            .map(|(date, mut files)| {
                files.sort_by_key(|f| self.file_rank(&f.kind));
                Snapshot { date, files }
            })
            .collect();

        tracing::debug!(
            objects = objects.len(),
            snapshots = snapshots.len(),
            "Listed bulk-data snapshots"
        );

        Ok(snapshots)
    }

    /// Relevant files of one snapshot; empty if the date was never published.
    pub async fn files_for_snapshot(&self, date: NaiveDate) -> Result<Vec<RemoteFile>, CatalogError> {
        Ok(self
            .list_snapshots()
            .await?
            .into_iter()
            .find(|s| s.date == date)
            .map(|s| s.files)
            .unwrap_or_default())
    }

    pub async fn snapshot(&self, date: NaiveDate) -> Result<Snapshot, CatalogError> {
        let files = self.files_for_snapshot(date).await?;
        Ok(Snapshot { date, files })
    }

    /// Classify one listed object; `None` if it is outside the table family.
    pub fn parse_remote_file(&self, object: &ObjectMeta) -> Option<RemoteFile> {
        let file_name = object.key.rsplit('/').next()?;
        let (file_name, compressed) = match file_name.strip_suffix(".bz2") {
            Some(stripped) => (stripped, true),
            None => (file_name, false),
        };

        let (stem, is_csv) = if let Some(stem) = file_name.strip_suffix(".csv") {
            (stem, true)
        } else if let Some(stem) = file_name.strip_suffix(".sql") {
            (stem, false)
        } else {
            return None;
        };

        let (name, date) = split_dated_stem(stem)?;

        let kind = if is_csv {
            FileKind::Table(self.plan.table_for_remote_stem(name)?.name.to_string())
        } else if name.contains("schema") {
            FileKind::Schema
        } else {
            return None;
        };

        Some(RemoteFile {
            key: object.key.clone(),
            date,
            kind,
            size: object.size,
            last_modified: DateTime::parse_from_rfc3339(&object.last_modified)
                .ok()
                .map(|ts| ts.with_timezone(&Utc)),
            compressed,
        })
    }

    fn file_rank(&self, kind: &FileKind) -> usize {
        match kind {
            FileKind::Schema => 0,
            FileKind::Table(table) => self.plan.position(table).map_or(usize::MAX, |p| p + 1),
        }
    }
}

/// Split `people-db-people-2024-10-31` into its name and date.
fn split_dated_stem(stem: &str) -> Option<(&str, NaiveDate)> {
    let split_at = stem.len().checked_sub(11)?;
    let (name, dated) = (stem.get(..split_at)?, stem.get(split_at..)?);
    let date = dated.strip_prefix('-')?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    if name.is_empty() {
        return None;
    }
    Some((name, date))
}
