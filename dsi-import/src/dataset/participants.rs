//! participants.tsv records

use super::tsv::{cell, TsvFile, TsvRow};
use crate::error::{ImportError, ImportResult};
use chrono::NaiveDate;
use indexmap::IndexMap;
use std::path::Path;

const BIRTH_DATE_COLUMNS: [&str; 3] = ["date_of_birth", "birth_date", "dob"];
const COHORT_COLUMNS: [&str; 2] = ["cohort", "subproject"];

/// One participants.tsv row
#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantRecord {
    /// Subject label, without the `sub-` prefix
    pub participant_id: String,
    pub date_of_birth: Option<NaiveDate>,
    pub sex: Option<String>,
    pub site: Option<String>,
    pub project: Option<String>,
    pub cohort: Option<String>,
    /// Every column, including the ones above, as written
    pub fields: IndexMap<String, String>,
}

impl ParticipantRecord {
    fn from_row(row: &TsvRow, path: &Path) -> ImportResult<Self> {
        let participant_id = cell(row, "participant_id")
            .ok_or_else(|| ImportError::invalid_data(path.display(), "row without participant_id"))?;
        let participant_id = participant_id
            .strip_prefix("sub-")
            .unwrap_or(participant_id)
            .to_string();

        let date_of_birth = BIRTH_DATE_COLUMNS
            .iter()
            .filter_map(|column| cell(row, column))
            .find_map(parse_date);

        let cohort = COHORT_COLUMNS
            .iter()
            .find_map(|column| cell(row, column))
            .map(str::to_string);

        Ok(Self {
            participant_id,
            date_of_birth,
            sex: cell(row, "sex").map(str::to_string),
            site: cell(row, "site").map(str::to_string),
            project: cell(row, "project").map(str::to_string),
            cohort,
            fields: row.clone(),
        })
    }
}

/// Parse a date written as a plain date or a timestamp
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .or_else(|| super::scans::parse_timestamp(value).map(|t| t.date()))
}

/// Parsed participants.tsv
#[derive(Debug, Clone)]
pub struct ParticipantsFile {
    pub table: TsvFile,
    pub records: Vec<ParticipantRecord>,
}

impl ParticipantsFile {
    pub fn read(path: &Path) -> ImportResult<Self> {
        let table = TsvFile::read(path)?;
        if !table.headers.iter().any(|h| h == "participant_id") {
            return Err(ImportError::invalid_data(
                path.display(),
                "missing participant_id column",
            ));
        }

        let records = table
            .rows
            .iter()
            .map(|row| ParticipantRecord::from_row(row, path))
            .collect::<ImportResult<Vec<_>>>()?;

        Ok(Self { table, records })
    }

    pub fn get(&self, participant_id: &str) -> Option<&ParticipantRecord> {
        self.records.iter().find(|r| r.participant_id == participant_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.records.iter().map(|r| r.participant_id.as_str())
    }
}
