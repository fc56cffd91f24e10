//! Error types for dsi-import
//!
//! Per-item failures (one subject, one acquisition, one channel row) are
//! collected into [`ImportError::Grouped`] by [`crate::error_group`]; structural
//! failures terminate the run.

use std::fmt;
use thiserror::Error;

/// Import result type
pub type ImportResult<T> = std::result::Result<T, ImportError>;

/// Import pipeline error
#[derive(Debug, Error)]
pub enum ImportError {
    /// A catalog entity or dataset file does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A label matches more than one catalog entity
    #[error("Ambiguous identifier: {0}")]
    AmbiguousIdentifier(String),

    /// A field required for entity creation is absent
    #[error("Missing required field '{field}' for {context}")]
    MissingRequiredField { field: String, context: String },

    /// Dataset directory cannot be read or does not match the expected layout
    #[error("Unreadable dataset: {0}")]
    UnreadableDataset(String),

    /// Destination path already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Annotation tag not present in the tag vocabulary
    #[error("Unrecognized tag: {0}")]
    UnrecognizedTag(String),

    /// File type or data type has no handler
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// Chunking executable could not be started
    #[error("Chunking unavailable: {0}")]
    ChunkingUnavailable(String),

    /// Chunking executable ran but produced no output
    #[error("Chunking failed: {0}")]
    ChunkingFailed(String),

    /// Metadata extractor could not read the acquisition
    #[error("Metadata extraction failed: {0}")]
    MetadataExtractionFailed(String),

    /// participants.tsv and subject directories disagree
    #[error("Participant mismatch: {0}")]
    ParticipantMismatch(String),

    /// Dataset directory identifier disagrees with the catalog
    #[error("Identifier mismatch: {0}")]
    IdentifierMismatch(String),

    /// Sidecar or table content is malformed
    #[error("Invalid data in {path}: {message}")]
    InvalidData { path: String, message: String },

    /// Several independent failures under one label
    #[error("{}", format_group(.label, .errors))]
    Grouped {
        label: String,
        errors: Vec<ImportError>,
    },

    #[error("Catalog error: {0}")]
    Catalog(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TSV error: {0}")]
    Tsv(#[from] csv::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error(transparent)]
    Common(#[from] dsi_common::Error),
}

impl ImportError {
    pub fn missing_field(field: impl Into<String>, context: impl Into<String>) -> Self {
        ImportError::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }

    pub fn invalid_data(path: impl fmt::Display, message: impl Into<String>) -> Self {
        ImportError::InvalidData {
            path: path.to_string(),
            message: message.into(),
        }
    }

    /// Whether this failure should terminate the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ImportError::UnreadableDataset(_)
                | ImportError::ParticipantMismatch(_)
                | ImportError::IdentifierMismatch(_)
                | ImportError::Catalog(_)
        )
    }

    /// Whether this failure comes from the external chunking step
    pub fn is_chunking(&self) -> bool {
        matches!(
            self,
            ImportError::ChunkingUnavailable(_) | ImportError::ChunkingFailed(_)
        )
    }

    /// All leaf failures, with groups flattened
    pub fn leaves(&self) -> Vec<&ImportError> {
        match self {
            ImportError::Grouped { errors, .. } => {
                errors.iter().flat_map(|e| e.leaves()).collect()
            }
            other => vec![other],
        }
    }
}

fn format_group(label: &str, errors: &[ImportError]) -> String {
    let mut text = format!("{} ({} error(s))", label, errors.len());
    for error in errors {
        for (i, line) in error.to_string().lines().enumerate() {
            let prefix = if i == 0 { "\n  - " } else { "\n    " };
            text.push_str(prefix);
            text.push_str(line);
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grouped_display_nests() {
        let error = ImportError::Grouped {
            label: "subjects".to_string(),
            errors: vec![
                ImportError::NotFound("site 'X'".to_string()),
                ImportError::Grouped {
                    label: "subject 03".to_string(),
                    errors: vec![ImportError::missing_field("site", "subject 03")],
                },
            ],
        };

        let text = error.to_string();
        assert!(text.starts_with("subjects (2 error(s))"));
        assert!(text.contains("\n  - Not found: site 'X'"));
        assert!(text.contains("\n    - Missing required field 'site' for subject 03"));
        assert_eq!(error.leaves().len(), 2);
    }

    #[test]
    fn test_fatality() {
        assert!(ImportError::UnreadableDataset("x".into()).is_fatal());
        assert!(!ImportError::NotFound("x".into()).is_fatal());
        assert!(!ImportError::ChunkingFailed("x".into()).is_fatal());
    }
}
