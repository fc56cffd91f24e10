//! Catalog row models

use serde::{Deserialize, Serialize};

/// Row of any name-keyed vocabulary table (modality, output type, cohort, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedEntity {
    pub id: i64,
    pub name: String,
}

/// A project or site, which may be referenced by name or alias
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasedEntity {
    pub id: i64,
    pub name: String,
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSubject {
    pub id: i64,
    /// Internal numeric identifier (six digits)
    pub cand_id: i64,
    /// External label, as used in `sub-<label>` directories
    pub label: String,
    pub date_of_birth: Option<String>,
    pub sex: Option<String>,
    pub site_id: i64,
    pub project_id: i64,
}

/// Fields needed to register a new subject
#[derive(Debug, Clone)]
pub struct NewSubject {
    pub cand_id: i64,
    pub label: String,
    pub date_of_birth: Option<String>,
    pub sex: Option<String>,
    pub site_id: i64,
    pub project_id: i64,
    pub registered_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogVisit {
    pub id: i64,
    pub subject_id: i64,
    pub visit_label: String,
    pub site_id: i64,
    pub project_id: i64,
    pub cohort_id: i64,
}

/// Fields needed to register a new visit
///
/// Administrative fields (stage, scan done, submitted, active) take the
/// catalog defaults.
#[derive(Debug, Clone)]
pub struct NewVisit {
    pub subject_id: i64,
    pub visit_label: String,
    pub site_id: i64,
    pub project_id: i64,
    pub cohort_id: i64,
}

/// One ingested acquisition file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedFile {
    pub id: i64,
    /// Path relative to the catalog data root
    pub path: String,
    pub file_type: String,
    pub visit_id: i64,
    pub modality_id: i64,
    pub output_type_id: i64,
    pub acquisition_time: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPlacedFile {
    pub path: String,
    pub file_type: String,
    pub visit_id: i64,
    pub modality_id: i64,
    pub output_type_id: i64,
    pub acquisition_time: Option<String>,
    pub inserted_by: String,
}

/// Parameter type as registered in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterType {
    pub id: i64,
    pub name: String,
    pub alias: Option<String>,
    pub category: String,
}

/// Owner of a parameter row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterScope {
    File(i64),
    Project(i64),
}

#[derive(Debug, Clone)]
pub struct NewChannel {
    pub file_id: i64,
    pub channel_type_id: i64,
    pub status_type_id: Option<i64>,
    pub file_path: String,
    pub name: String,
    pub description: Option<String>,
    pub sampling_frequency: Option<i64>,
    pub low_cutoff: Option<f64>,
    pub high_cutoff: Option<f64>,
    pub notch: Option<i64>,
    pub status_description: Option<String>,
    pub unit: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub file_id: i64,
    pub channel_id: Option<i64>,
    pub file_path: String,
    pub onset: f64,
    pub duration: f64,
    pub trial_type: Option<String>,
    pub response_time: Option<f64>,
    /// Unrecognized columns as a JSON object
    pub extra_columns: Option<String>,
}

/// HED tag vocabulary entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HedTag {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
}

/// What a persisted tag group belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagSource {
    Project(i64),
    File(i64),
    Event(i64),
}

impl TagSource {
    pub fn kind(&self) -> &'static str {
        match self {
            TagSource::Project(_) => "project",
            TagSource::File(_) => "file",
            TagSource::Event(_) => "event",
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            TagSource::Project(id) | TagSource::File(id) | TagSource::Event(id) => *id,
        }
    }
}

/// One persisted tag group member
#[derive(Debug, Clone, PartialEq)]
pub struct TagGroupRow {
    pub position: i64,
    pub hed_tag_id: Option<i64>,
    pub tag_value: Option<String>,
    pub has_pairing: bool,
    pub additional_members: i64,
    pub property_name: Option<String>,
    pub property_value: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewElectrode {
    pub file_id: i64,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}
