//! Tab-separated table files (participants.tsv, scans.tsv, channels, events)

use crate::error::{ImportError, ImportResult};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// Marker for an absent value in dataset tables
pub const NOT_AVAILABLE: &str = "n/a";

/// One table row, keyed by column header in file order
pub type TsvRow = IndexMap<String, String>;

/// A parsed TSV file
#[derive(Debug, Clone)]
pub struct TsvFile {
    pub path: PathBuf,
    pub headers: Vec<String>,
    pub rows: Vec<TsvRow>,
}

impl TsvFile {
    pub fn read(path: &Path) -> ImportResult<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(false)
            .from_path(path)?;

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let row = headers
                .iter()
                .cloned()
                .zip(record.iter().map(|v| v.trim().to_string()))
                .collect();
            rows.push(row);
        }

        Ok(Self {
            path: path.to_path_buf(),
            headers,
            rows,
        })
    }

    /// Write the table, keeping the header order
    pub fn write(&self, path: &Path) -> ImportResult<()> {
        let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(
                self.headers
                    .iter()
                    .map(|h| row.get(h).map(String::as_str).unwrap_or(NOT_AVAILABLE)),
            )?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Append the rows of `other` whose `key` column is not already present
    ///
    /// Columns only present in `other` are added; rows that lack them get
    /// `n/a`.
    pub fn append_missing(&mut self, other: &TsvFile, key: &str) -> usize {
        for header in &other.headers {
            if !self.headers.contains(header) {
                self.headers.push(header.clone());
            }
        }

        let mut appended = 0;
        for row in &other.rows {
            let Some(id) = row.get(key) else { continue };
            if self.rows.iter().any(|existing| existing.get(key) == Some(id)) {
                continue;
            }
            self.rows.push(row.clone());
            appended += 1;
        }
        appended
    }
}

/// Read a column value, treating empty and `n/a` as absent
pub fn cell<'a>(row: &'a TsvRow, column: &str) -> Option<&'a str> {
    row.get(column)
        .map(String::as_str)
        .filter(|v| !v.is_empty() && *v != NOT_AVAILABLE)
}

/// Read a required column value
pub fn required_cell<'a>(row: &'a TsvRow, column: &str, path: &Path) -> ImportResult<&'a str> {
    cell(row, column).ok_or_else(|| {
        ImportError::invalid_data(path.display(), format!("missing value for column '{}'", column))
    })
}

/// Parse an optional numeric column
pub fn number_cell(row: &TsvRow, column: &str, path: &Path) -> ImportResult<Option<f64>> {
    match cell(row, column) {
        None => Ok(None),
        Some(value) => value.parse::<f64>().map(Some).map_err(|_| {
            ImportError::invalid_data(
                path.display(),
                format!("column '{}' is not a number: '{}'", column, value),
            )
        }),
    }
}
