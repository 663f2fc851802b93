use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// What a published file contains.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "table")]
pub enum FileKind {
    Schema,
    Table(String),
}

impl FileKind {
    /// Deterministic local file name for this kind within a snapshot.
    pub fn local_file_name(&self, date: NaiveDate) -> String {
        match self {
            FileKind::Schema => format!("schema-{}.sql", date.format("%Y-%m-%d")),
            FileKind::Table(table) => format!("{}-{}.csv", table, date.format("%Y-%m-%d")),
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::Schema => f.write_str("schema"),
            FileKind::Table(table) => f.write_str(table),
        }
    }
}

/// One object of a published snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub key: String,
    pub date: NaiveDate,
    pub kind: FileKind,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
    /// Published bzip2-compressed; decompressed on download.
    pub compressed: bool,
}

impl RemoteFile {
    pub fn local_file_name(&self) -> String {
        self.kind.local_file_name(self.date)
    }
}

/// A dated bulk-data export with the files relevant to the people database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub date: NaiveDate,
    pub files: Vec<RemoteFile>,
}

impl Snapshot {
    pub fn schema(&self) -> Option<&RemoteFile> {
        self.files.iter().find(|f| f.kind == FileKind::Schema)
    }

    pub fn table_file(&self, table: &str) -> Option<&RemoteFile> {
        self.files
            .iter()
            .find(|f| matches!(&f.kind, FileKind::Table(t) if t == table))
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }
}

/// A remote file materialised under the data directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalFile {
    pub kind: FileKind,
    pub path: PathBuf,
    pub size: u64,
    /// False when the file was already present and no transfer happened.
    pub downloaded: bool,
}

/// A file the fetcher could not materialise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchFailure {
    pub file: String,
    pub cause: String,
}

/// Outcome of one fetch call: what is on disk, and what is not.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetchReport {
    pub date: Option<NaiveDate>,
    pub files: Vec<LocalFile>,
    pub failures: Vec<FetchFailure>,
    /// The snapshot was published without a schema file.
    #[serde(default)]
    pub schema_missing: bool,
}

impl FetchReport {
    pub fn downloaded_count(&self) -> usize {
        self.files.iter().filter(|f| f.downloaded).count()
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.files
            .iter()
            .any(|f| matches!(&f.kind, FileKind::Table(t) if t == table))
    }
}

/// Emitted each time one file of a fetch finishes, successfully or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchProgress {
    pub file: String,
    pub completed: usize,
    pub total: usize,
}

impl FetchProgress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }
}
