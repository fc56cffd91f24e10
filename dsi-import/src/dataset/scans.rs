//! scans.tsv acquisition times

use super::tsv::{cell, TsvFile};
use crate::error::ImportResult;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::path::Path;

const ACQUISITION_TIME_COLUMNS: [&str; 3] = ["acq_time", "mri_acq_time", "eeg_acq_time"];

/// Column naming the listed file, relative to the scans.tsv directory
pub const FILENAME_COLUMN: &str = "filename";

/// Catalog representation of acquisition times
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parsed scans.tsv of a visit (or of a subject without sessions)
#[derive(Debug, Clone)]
pub struct ScansFile {
    table: TsvFile,
}

impl ScansFile {
    pub fn read(path: &Path) -> ImportResult<Self> {
        Ok(Self {
            table: TsvFile::read(path)?,
        })
    }

    pub fn path(&self) -> &Path {
        &self.table.path
    }

    /// Acquisition time of a file, given relative to the scans.tsv directory
    ///
    /// The first time column that parses wins.
    pub fn acquisition_time(&self, relative_path: &str) -> Option<NaiveDateTime> {
        let row = self
            .table
            .rows
            .iter()
            .find(|row| cell(row, FILENAME_COLUMN) == Some(relative_path))?;

        ACQUISITION_TIME_COLUMNS
            .iter()
            .filter_map(|column| cell(row, column))
            .find_map(parse_timestamp)
    }
}

/// Parse the timestamp layouts found in scans.tsv files
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();

    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Some(time.naive_utc());
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(time) = NaiveDateTime::parse_from_str(value, format) {
            return Some(time);
        }
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_parseable_column_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub-01_ses-V1_scans.tsv");
        std::fs::write(
            &path,
            "filename\tacq_time\teeg_acq_time\n\
             eeg/sub-01_ses-V1_task-rest_eeg.edf\tgarbage\t2021-03-04T10:11:12\n\
             anat/sub-01_ses-V1_T1w.nii.gz\t2021-03-04T09:00:00.500\tn/a\n",
        )
        .unwrap();

        let scans = ScansFile::read(&path).unwrap();
        let eeg = scans
            .acquisition_time("eeg/sub-01_ses-V1_task-rest_eeg.edf")
            .unwrap();
        assert_eq!(eeg.format(TIMESTAMP_FORMAT).to_string(), "2021-03-04 10:11:12");

        let anat = scans.acquisition_time("anat/sub-01_ses-V1_T1w.nii.gz").unwrap();
        assert_eq!(anat.format(TIMESTAMP_FORMAT).to_string(), "2021-03-04 09:00:00");

        assert!(scans.acquisition_time("func/missing.nii").is_none());
    }

    #[test]
    fn test_parse_timestamp_layouts() {
        assert!(parse_timestamp("2020-01-01T00:00:00Z").is_some());
        assert!(parse_timestamp("2020-01-01 08:30:00").is_some());
        assert!(parse_timestamp("2020-01-01").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
