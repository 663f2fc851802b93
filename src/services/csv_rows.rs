//! Tolerant CSV reading and column reconciliation.
//!
//! The upstream export occasionally contains rows with stray delimiters or
//! broken quoting. Such rows are reported and skipped; they never abort the
//! file. Only an I/O failure stops reading.

use csv::{ByteRecord, ReaderBuilder};
use std::collections::HashSet;
use std::fmt;
use std::io::Read;

/// One live column of the destination table.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    /// SQL type as rendered by `format_type`, e.g. `character varying(50)`.
    pub data_type: String,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
        }
    }
}

/// A file column that will be loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedColumn {
    pub name: String,
    /// Position of the column in the file header.
    pub source_index: usize,
    /// Type the text value is cast to on insert.
    pub cast: String,
    temporal: bool,
    integer_key: bool,
}

/// Columns shared by the file header and the table schema.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMapping {
    pub columns: Vec<MappedColumn>,
    /// File columns absent from the schema.
    pub dropped: Vec<String>,
    /// Schema columns absent from the file.
    pub missing: Vec<String>,
    pub header_len: usize,
}

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("No columns in common between file and table {table}")]
pub struct NoCommonColumns {
    pub table: String,
}

/// Match a file header against the live table columns.
pub fn reconcile(
    table: &str,
    header: &[String],
    schema: &[ColumnInfo],
    integer_id: bool,
) -> Result<ColumnMapping, NoCommonColumns> {
    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    let mut dropped = Vec::new();

    for (index, name) in header.iter().enumerate() {
        if !seen.insert(name.as_str()) {
            dropped.push(name.clone());
            continue;
        }
        match schema.iter().find(|c| &c.name == name) {
            Some(column) => {
                let cast = column.data_type.to_lowercase();
                columns.push(MappedColumn {
                    name: name.clone(),
                    source_index: index,
                    temporal: cast.starts_with("date") || cast.starts_with("timestamp"),
                    integer_key: integer_id && name == "id",
                    cast: column.data_type.clone(),
                });
            }
            None => dropped.push(name.clone()),
        }
    }

    if columns.is_empty() {
        return Err(NoCommonColumns {
            table: table.to_string(),
        });
    }

    let missing = schema
        .iter()
        .filter(|c| !seen.contains(c.name.as_str()))
        .map(|c| c.name.clone())
        .collect();

    Ok(ColumnMapping {
        columns,
        dropped,
        missing,
        header_len: header.len(),
    })
}

/// Values of one row, in `ColumnMapping::columns` order. `None` is NULL.
pub type Row = Vec<Option<String>>;

#[derive(Debug, Clone, PartialEq)]
pub enum RowError {
    FieldCount { expected: usize, found: usize },
    Encoding { column: String },
    MissingId,
    InvalidId(String),
}

impl fmt::Display for RowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowError::FieldCount { expected, found } => {
                write!(f, "expected {expected} fields, found {found}")
            }
            RowError::Encoding { column } => write!(f, "invalid UTF-8 in column {column}"),
            RowError::MissingId => f.write_str("missing id"),
            RowError::InvalidId(value) => write!(f, "invalid id value {value:?}"),
        }
    }
}

impl ColumnMapping {
    /// Convert one raw record into bind values.
    pub fn convert(&self, record: &ByteRecord) -> Result<Row, RowError> {
        if record.len() != self.header_len {
            return Err(RowError::FieldCount {
                expected: self.header_len,
                found: record.len(),
            });
        }

        let mut row = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let raw = record.get(column.source_index).unwrap_or_default();
            let value = std::str::from_utf8(raw).map_err(|_| RowError::Encoding {
                column: column.name.clone(),
            })?;

            let value = match value {
                "" => None,
                "0" if column.temporal => None,
                v => Some(v.to_string()),
            };

            if column.integer_key {
                match &value {
                    None => return Err(RowError::MissingId),
                    Some(v) if v.parse::<i64>().is_err() => {
                        return Err(RowError::InvalidId(v.clone()))
                    }
                    Some(_) => {}
                }
            }

            row.push(value);
        }
        Ok(row)
    }
}

/// Read the header row of a CSV source.
pub fn read_header<R: Read>(reader: R) -> Result<Vec<String>, csv::Error> {
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(reader);
    let header = reader.byte_headers()?;
    Ok(header
        .iter()
        .enumerate()
        .map(|(i, field)| {
            let name = String::from_utf8_lossy(field);
            let name = if i == 0 { name.trim_start_matches('\u{feff}') } else { &name };
            name.trim().to_string()
        })
        .collect())
}

/// Counters for one pass over a file.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ParseSummary {
    pub rows: u64,
    pub skipped: u64,
}

/// Stream the data rows of a CSV source in batches.
///
/// `on_batch` returns `false` to stop reading early (e.g. the consumer went
/// away). Row errors are passed to `on_row_error` with the 1-based line.
pub fn read_rows<R: Read>(
    reader: R,
    mapping: &ColumnMapping,
    batch_rows: usize,
    mut on_row_error: impl FnMut(u64, RowError),
    mut on_batch: impl FnMut(Vec<Row>) -> bool,
) -> Result<ParseSummary, csv::Error> {
    let batch_rows = batch_rows.max(1);
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let mut summary = ParseSummary::default();
    let mut batch = Vec::with_capacity(batch_rows);
    let mut record = ByteRecord::new();

    while reader.read_byte_record(&mut record)? {
        match mapping.convert(&record) {
            Ok(row) => {
                summary.rows += 1;
                batch.push(row);
            }
            Err(error) => {
                summary.skipped += 1;
                let line = record.position().map_or(0, |p| p.line());
                on_row_error(line, error);
                continue;
            }
        }

        if batch.len() >= batch_rows && !on_batch(std::mem::replace(&mut batch, Vec::with_capacity(batch_rows))) {
            return Ok(summary);
        }
    }

    if !batch.is_empty() {
        on_batch(batch);
    }

    Ok(summary)
}
