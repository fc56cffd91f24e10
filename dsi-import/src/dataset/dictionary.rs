//! Data dictionaries for tabular files (`*_events.json`, root `events.json`)

use crate::error::{ImportError, ImportResult};
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// HED annotation of a column
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum HedAnnotation {
    /// One annotation for every value of the column
    Single(String),
    /// One annotation per categorical level
    ByLevel(IndexMap<String, String>),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LevelDescription {
    Text(String),
    Detailed {
        #[serde(rename = "Description")]
        description: String,
        #[serde(rename = "TermURL", default)]
        term_url: Option<String>,
    },
}

impl LevelDescription {
    pub fn text(&self) -> &str {
        match self {
            LevelDescription::Text(text) => text,
            LevelDescription::Detailed { description, .. } => description,
        }
    }
}

/// Description of one column
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ColumnDescription {
    #[serde(rename = "LongName", default)]
    pub long_name: Option<String>,

    #[serde(rename = "Description", default)]
    pub description: Option<String>,

    #[serde(rename = "Levels", default)]
    pub levels: IndexMap<String, LevelDescription>,

    #[serde(rename = "Units", default)]
    pub units: Option<String>,

    #[serde(rename = "HED", default)]
    pub hed: Option<HedAnnotation>,
}

impl ColumnDescription {
    pub fn level_description(&self, level: &str) -> Option<&str> {
        self.levels.get(level).map(LevelDescription::text)
    }
}

/// One HED annotation to persist, with the property it describes
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyAnnotation<'a> {
    pub property_name: &'a str,
    pub property_value: Option<&'a str>,
    pub description: Option<&'a str>,
    pub hed: &'a str,
}

#[derive(Debug, Clone)]
pub struct DataDictionary {
    pub path: PathBuf,
    pub columns: IndexMap<String, ColumnDescription>,
}

impl DataDictionary {
    pub fn read(path: &Path) -> ImportResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let columns = serde_json::from_str(&content)
            .map_err(|e| ImportError::invalid_data(path.display(), e.to_string()))?;
        Ok(Self {
            path: path.to_path_buf(),
            columns,
        })
    }

    /// Every HED annotation in the dictionary, column by column
    ///
    /// Per-level annotations carry the level as property value and the
    /// level description.
    pub fn hed_annotations(&self) -> Vec<PropertyAnnotation<'_>> {
        let mut annotations = Vec::new();
        for (column, description) in &self.columns {
            match &description.hed {
                None => {}
                Some(HedAnnotation::Single(hed)) => annotations.push(PropertyAnnotation {
                    property_name: column,
                    property_value: None,
                    description: description.description.as_deref(),
                    hed,
                }),
                Some(HedAnnotation::ByLevel(levels)) => {
                    for (level, hed) in levels {
                        annotations.push(PropertyAnnotation {
                            property_name: column,
                            property_value: Some(level),
                            description: description.level_description(level),
                            hed,
                        });
                    }
                }
            }
        }
        annotations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hed_annotations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task-rest_events.json");
        std::fs::write(
            &path,
            r#"{
                "onset": {"Description": "Event onset", "Units": "s"},
                "trial_type": {
                    "Description": "Stimulus kind",
                    "Levels": {
                        "face": "A face was shown",
                        "house": {"Description": "A house was shown", "TermURL": "http://x"}
                    },
                    "HED": {"face": "Face", "house": "(Building,Visual)"}
                },
                "response_time": {"HED": "Response"}
            }"#,
        )
        .unwrap();

        let dictionary = DataDictionary::read(&path).unwrap();
        let annotations = dictionary.hed_annotations();
        assert_eq!(annotations.len(), 3);

        assert_eq!(annotations[0].property_name, "trial_type");
        assert_eq!(annotations[0].property_value, Some("face"));
        assert_eq!(annotations[0].description, Some("A face was shown"));
        assert_eq!(annotations[1].description, Some("A house was shown"));
        assert_eq!(annotations[1].hed, "(Building,Visual)");

        assert_eq!(annotations[2].property_name, "response_time");
        assert_eq!(annotations[2].property_value, None);
    }
}
