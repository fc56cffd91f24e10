//! dataset_description.json

use crate::error::{ImportError, ImportResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;

static NAME_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^0-9a-zA-Z]+").expect("name separator regex"));
static VERSION_SEPARATORS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^0-9a-zA-Z.]+").expect("version separator regex"));

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetDescription {
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "BIDSVersion")]
    pub bids_version: String,

    #[serde(rename = "DatasetType", default)]
    pub dataset_type: Option<String>,
}

impl DatasetDescription {
    pub fn read(path: &Path) -> ImportResult<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| ImportError::invalid_data(path.display(), e.to_string()))
    }

    /// Directory name of the managed copy: `<Name>_BIDSVersion_<version>`
    pub fn managed_dir_name(&self) -> String {
        format!(
            "{}_BIDSVersion_{}",
            NAME_SEPARATORS.replace_all(&self.name, "_"),
            VERSION_SEPARATORS.replace_all(&self.bids_version, "_")
        )
    }
}
