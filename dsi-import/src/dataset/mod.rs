//! Dataset tree traversal
//!
//! A dataset is laid out as `sub-<label>/[ses-<label>/]<dataType>/<files>`.
//! [`DatasetTree`] discovers that hierarchy lazily: each node lists its
//! children on first access and keeps them for its lifetime. Entries are
//! returned in directory order, which is not guaranteed to be sorted.
//!
//! Only `sub-*` directories at the root are subjects, so `code/`,
//! `sourcedata/`, `derivatives/` and the like are never traversed.

pub mod acquisition;
pub mod description;
pub mod dictionary;
pub mod participants;
pub mod scans;
pub mod sidecar;
pub mod tsv;

use crate::error::{ImportError, ImportResult};
use acquisition::{Acquisition, DataTypeFamily};
use description::DatasetDescription;
use once_cell::sync::OnceCell;
use participants::{ParticipantRecord, ParticipantsFile};
use scans::ScansFile;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Whether a dataset holds raw recordings or derived outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetType {
    Raw,
    Derivative,
}

impl DatasetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetType::Raw => "raw",
            DatasetType::Derivative => "derivative",
        }
    }
}

impl fmt::Display for DatasetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DatasetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(DatasetType::Raw),
            "derivative" => Ok(DatasetType::Derivative),
            other => Err(format!("dataset type must be 'raw' or 'derivative', got '{}'", other)),
        }
    }
}

/// Subject identity as read from the dataset
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectInfo {
    /// Label without the `sub-` prefix
    pub label: String,
    pub participant: Option<ParticipantRecord>,
}

/// Visit identity as read from the dataset
#[derive(Debug, Clone, PartialEq)]
pub struct VisitInfo {
    pub subject: SubjectInfo,
    /// Label without the `ses-` prefix; `None` when the subject has no sessions
    pub visit_label: Option<String>,
}

/// Data-type identity as read from the dataset
#[derive(Debug, Clone, PartialEq)]
pub struct DataTypeInfo {
    pub visit: VisitInfo,
    pub data_type: String,
}

/// Options for opening a dataset
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Check the directory layout before traversal
    pub validate: bool,
    /// Dataset type when dataset_description.json does not give one
    pub dataset_type: Option<DatasetType>,
}

/// A dataset directory and its lazily discovered hierarchy
#[derive(Debug)]
pub struct DatasetTree {
    root: PathBuf,
    description: Option<DatasetDescription>,
    dataset_type: DatasetType,
    participants: Option<ParticipantsFile>,
    subjects: OnceCell<Vec<SubjectNode>>,
}

#[derive(Debug)]
pub struct SubjectNode {
    pub info: SubjectInfo,
    pub path: PathBuf,
    sessions: OnceCell<Vec<VisitNode>>,
    direct_data_types: OnceCell<Vec<DataTypeNode>>,
}

#[derive(Debug)]
pub struct VisitNode {
    pub info: VisitInfo,
    pub path: PathBuf,
    data_types: OnceCell<Vec<DataTypeNode>>,
    scans: OnceCell<Option<ScansFile>>,
}

#[derive(Debug)]
pub struct DataTypeNode {
    pub info: DataTypeInfo,
    pub path: PathBuf,
    /// Directory holding the scans.tsv that lists this data type's files
    pub scans_dir: PathBuf,
    acquisitions: OnceCell<Vec<Acquisition>>,
}

impl DatasetTree {
    /// Open a dataset directory
    ///
    /// Fails with `UnreadableDataset` when the directory is missing, when the
    /// dataset type cannot be determined, when validation is enabled and the
    /// layout does not conform, or when no subject holds a data-type directory
    /// of a supported family.
    pub fn open(root: &Path, options: &OpenOptions) -> ImportResult<Self> {
        if !root.is_dir() {
            return Err(ImportError::UnreadableDataset(format!(
                "'{}' is not a directory",
                root.display()
            )));
        }

        let description_path = root.join("dataset_description.json");
        let description = if description_path.is_file() {
            Some(DatasetDescription::read(&description_path)?)
        } else {
            None
        };

        let dataset_type = match (options.dataset_type, &description) {
            (Some(explicit), _) => explicit,
            (None, Some(description)) => match description.dataset_type.as_deref() {
                Some("derivative") => DatasetType::Derivative,
                _ => DatasetType::Raw,
            },
            (None, None) => {
                return Err(ImportError::UnreadableDataset(format!(
                    "no dataset_description.json in '{}'; the dataset type must be given",
                    root.display()
                )))
            }
        };

        let participants_path = root.join("participants.tsv");
        let participants = if participants_path.is_file() {
            Some(ParticipantsFile::read(&participants_path)?)
        } else {
            None
        };

        let tree = Self {
            root: root.to_path_buf(),
            description,
            dataset_type,
            participants,
            subjects: OnceCell::new(),
        };

        if options.validate {
            tree.validate()?;
        }

        if tree.data_types()?.iter().all(|node| node.family().is_none()) {
            return Err(ImportError::UnreadableDataset(format!(
                "no supported data-type directories found in '{}'",
                root.display()
            )));
        }

        info!(
            root = %root.display(),
            dataset_type = %dataset_type,
            subjects = tree.subjects()?.len(),
            "Opened dataset"
        );

        Ok(tree)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn description(&self) -> Option<&DatasetDescription> {
        self.description.as_ref()
    }

    pub fn dataset_type(&self) -> DatasetType {
        self.dataset_type
    }

    pub fn participants(&self) -> Option<&ParticipantsFile> {
        self.participants.as_ref()
    }

    pub fn participant_record(&self, subject_label: &str) -> Option<&ParticipantRecord> {
        self.participants.as_ref()?.get(subject_label)
    }

    /// Subject directories, in directory order
    pub fn subjects(&self) -> ImportResult<&[SubjectNode]> {
        self.subjects
            .get_or_try_init(|| {
                let mut subjects = Vec::new();
                for (label, path) in prefixed_dirs(&self.root, "sub-")? {
                    debug!(subject = %label, "Found subject directory");
                    subjects.push(SubjectNode {
                        info: SubjectInfo {
                            participant: self.participant_record(&label).cloned(),
                            label,
                        },
                        path,
                        sessions: OnceCell::new(),
                        direct_data_types: OnceCell::new(),
                    });
                }
                Ok(subjects)
            })
            .map(Vec::as_slice)
    }

    /// Every session of every subject
    pub fn sessions(&self) -> ImportResult<Vec<&VisitNode>> {
        let mut sessions = Vec::new();
        for subject in self.subjects()? {
            sessions.extend(subject.sessions()?);
        }
        Ok(sessions)
    }

    /// Every data-type directory of every subject
    pub fn data_types(&self) -> ImportResult<Vec<&DataTypeNode>> {
        let mut data_types = Vec::new();
        for subject in self.subjects()? {
            data_types.extend(subject.data_types()?);
        }
        Ok(data_types)
    }

    /// Check directory naming and participants consistency
    pub fn validate(&self) -> ImportResult<()> {
        let mut violations = Vec::new();

        match &self.description {
            Some(_) => {}
            None => violations.push("dataset_description.json is missing".to_string()),
        }

        for subject in self.subjects()? {
            if !is_alphanumeric(&subject.info.label) {
                violations.push(format!("invalid subject directory '{}'", subject.path.display()));
            }
            for session in subject.sessions()? {
                if let Some(label) = &session.info.visit_label {
                    if !is_alphanumeric(label) {
                        violations.push(format!(
                            "invalid session directory '{}'",
                            session.path.display()
                        ));
                    }
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ImportError::UnreadableDataset(format!(
                "'{}' does not follow the dataset layout: {}",
                self.root.display(),
                violations.join("; ")
            )))
        }
    }

    /// Check that participants.tsv lists exactly the subject directories
    pub fn check_participants(&self) -> ImportResult<()> {
        let Some(participants) = &self.participants else {
            return Ok(());
        };

        let mut labels: Vec<&str> = self
            .subjects()?
            .iter()
            .map(|s| s.info.label.as_str())
            .collect();

        for id in participants.ids() {
            match labels.iter().position(|label| *label == id) {
                Some(index) => {
                    labels.remove(index);
                }
                None => {
                    return Err(ImportError::ParticipantMismatch(format!(
                        "participant '{}' has no subject directory",
                        id
                    )))
                }
            }
        }

        if labels.is_empty() {
            Ok(())
        } else {
            Err(ImportError::ParticipantMismatch(format!(
                "subject directories missing from participants.tsv: {}",
                labels.join(", ")
            )))
        }
    }
}

impl SubjectNode {
    /// `ses-*` directories of this subject
    pub fn sessions(&self) -> ImportResult<&[VisitNode]> {
        self.sessions
            .get_or_try_init(|| {
                Ok(prefixed_dirs(&self.path, "ses-")?
                    .into_iter()
                    .map(|(label, path)| VisitNode {
                        info: VisitInfo {
                            subject: self.info.clone(),
                            visit_label: Some(label),
                        },
                        path,
                        data_types: OnceCell::new(),
                        scans: OnceCell::new(),
                    })
                    .collect())
            })
            .map(Vec::as_slice)
    }

    /// Data types of every session, or those directly under the subject
    /// directory when it has no sessions
    pub fn data_types(&self) -> ImportResult<Vec<&DataTypeNode>> {
        let sessions = self.sessions()?;
        if sessions.is_empty() {
            let direct = self.direct_data_types.get_or_try_init(|| {
                let visit = VisitInfo {
                    subject: self.info.clone(),
                    visit_label: None,
                };
                data_type_dirs(&self.path, &visit)
            })?;
            return Ok(direct.iter().collect());
        }

        let mut data_types = Vec::new();
        for session in sessions {
            data_types.extend(session.data_types()?.iter());
        }
        Ok(data_types)
    }

    /// The scans.tsv of a subject without sessions
    pub fn scans(&self) -> ImportResult<Option<ScansFile>> {
        find_scans(&self.path)
    }
}

impl VisitNode {
    pub fn data_types(&self) -> ImportResult<&[DataTypeNode]> {
        self.data_types
            .get_or_try_init(|| data_type_dirs(&self.path, &self.info))
            .map(Vec::as_slice)
    }

    pub fn scans(&self) -> ImportResult<Option<&ScansFile>> {
        self.scans
            .get_or_try_init(|| find_scans(&self.path))
            .map(Option::as_ref)
    }
}

impl DataTypeNode {
    pub fn family(&self) -> Option<DataTypeFamily> {
        DataTypeFamily::of(&self.info.data_type)
    }

    /// Acquisitions of this directory; empty for unsupported data types
    pub fn acquisitions(&self) -> ImportResult<&[Acquisition]> {
        self.acquisitions
            .get_or_try_init(|| match self.family() {
                Some(family) => acquisition::discover(&self.path, family),
                None => Ok(Vec::new()),
            })
            .map(Vec::as_slice)
    }
}

fn is_alphanumeric(label: &str) -> bool {
    !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Child directories named `<prefix><label>`, in directory order
fn prefixed_dirs(dir: &Path, prefix: &str) -> ImportResult<Vec<(String, PathBuf)>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        if let Some(label) = entry.file_name().to_str().and_then(|n| n.strip_prefix(prefix)) {
            found.push((label.to_string(), entry.path().to_path_buf()));
        }
    }
    Ok(found)
}

fn data_type_dirs(dir: &Path, visit: &VisitInfo) -> ImportResult<Vec<DataTypeNode>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if name.starts_with("ses-") || name.starts_with('.') {
            continue;
        }
        found.push(DataTypeNode {
            info: DataTypeInfo {
                visit: visit.clone(),
                data_type: name.to_string(),
            },
            path: entry.path().to_path_buf(),
            scans_dir: dir.to_path_buf(),
            acquisitions: OnceCell::new(),
        });
    }
    Ok(found)
}

fn find_scans(dir: &Path) -> ImportResult<Option<ScansFile>> {
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        let is_scans = entry
            .file_name()
            .to_str()
            .map_or(false, |n| n.ends_with("_scans.tsv"));
        if is_scans && entry.file_type().is_file() {
            return Ok(Some(ScansFile::read(entry.path())?));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn sample_dataset(root: &Path) {
        write(
            &root.join("dataset_description.json"),
            r#"{"Name": "Sample", "BIDSVersion": "1.8.0"}"#,
        );
        write(
            &root.join("participants.tsv"),
            "participant_id\tsite\nsub-01\tMTL\nsub-02\tMTL\n",
        );
        write(&root.join("sub-01/ses-V1/anat/sub-01_ses-V1_T1w.nii.gz"), "n");
        write(&root.join("sub-01/ses-V2/anat/sub-01_ses-V2_T1w.nii.gz"), "n");
        write(&root.join("sub-02/eeg/sub-02_task-rest_eeg.edf"), "e");
        write(&root.join("code/sub-99/anat/x.nii"), "n");
    }

    #[test]
    fn test_hierarchy() {
        let dir = tempfile::tempdir().unwrap();
        sample_dataset(dir.path());

        let tree = DatasetTree::open(dir.path(), &OpenOptions::default()).unwrap();
        assert_eq!(tree.dataset_type(), DatasetType::Raw);

        let mut labels: Vec<&str> = tree.subjects().unwrap().iter().map(|s| s.info.label.as_str()).collect();
        labels.sort();
        assert_eq!(labels, vec!["01", "02"]);

        assert_eq!(tree.sessions().unwrap().len(), 2);

        let data_types = tree.data_types().unwrap();
        assert_eq!(data_types.len(), 3);
        let direct = data_types
            .iter()
            .find(|d| d.info.visit.subject.label == "02")
            .unwrap();
        assert_eq!(direct.info.visit.visit_label, None);
        assert_eq!(direct.info.data_type, "eeg");
        assert_eq!(direct.acquisitions().unwrap().len(), 1);

        assert_eq!(
            tree.participant_record("01").and_then(|p| p.site.as_deref()),
            Some("MTL")
        );
        tree.check_participants().unwrap();
    }

    #[test]
    fn test_children_are_cached() {
        let dir = tempfile::tempdir().unwrap();
        sample_dataset(dir.path());
        let tree = DatasetTree::open(dir.path(), &OpenOptions::default()).unwrap();

        let before = tree.sessions().unwrap().len();
        write(&dir.path().join("sub-01/ses-V3/anat/sub-01_ses-V3_T1w.nii.gz"), "n");
        assert_eq!(tree.sessions().unwrap().len(), before);
    }

    #[test]
    fn test_no_data_types_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("dataset_description.json"),
            r#"{"Name": "Empty", "BIDSVersion": "1.8.0"}"#,
        );
        fs::create_dir_all(dir.path().join("sub-01")).unwrap();

        let result = DatasetTree::open(dir.path(), &OpenOptions::default());
        assert!(matches!(result, Err(ImportError::UnreadableDataset(_))));
    }

    #[test]
    fn test_only_unsupported_data_types_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        write(
            &dir.path().join("dataset_description.json"),
            r#"{"Name": "Pet", "BIDSVersion": "1.8.0"}"#,
        );
        write(&dir.path().join("sub-Rye01/pet/sub-Rye01_pet.nii.gz"), "p");

        let result = DatasetTree::open(dir.path(), &OpenOptions::default());
        assert!(matches!(result, Err(ImportError::UnreadableDataset(_))));

        // One supported directory is enough
        write(&dir.path().join("sub-Rye01/anat/sub-Rye01_T1w.nii.gz"), "n");
        DatasetTree::open(dir.path(), &OpenOptions::default()).unwrap();
    }

    #[test]
    fn test_type_required_without_description() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("sub-01/anat/sub-01_T1w.nii"), "n");

        assert!(matches!(
            DatasetTree::open(dir.path(), &OpenOptions::default()),
            Err(ImportError::UnreadableDataset(_))
        ));

        let options = OpenOptions {
            dataset_type: Some(DatasetType::Derivative),
            ..Default::default()
        };
        let tree = DatasetTree::open(dir.path(), &options).unwrap();
        assert_eq!(tree.dataset_type(), DatasetType::Derivative);
    }

    #[test]
    fn test_validation_lists_violations() {
        let dir = tempfile::tempdir().unwrap();
        sample_dataset(dir.path());
        write(&dir.path().join("sub-0_3/ses-V-1/anat/x.nii"), "n");

        let options = OpenOptions {
            validate: true,
            ..Default::default()
        };
        match DatasetTree::open(dir.path(), &options) {
            Err(ImportError::UnreadableDataset(message)) => {
                assert!(message.contains("sub-0_3"));
                assert!(message.contains("ses-V-1"));
            }
            other => panic!("expected validation failure, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_participant_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        sample_dataset(dir.path());
        write(&dir.path().join("sub-03/anat/sub-03_T1w.nii"), "n");

        let tree = DatasetTree::open(dir.path(), &OpenOptions::default()).unwrap();
        assert!(matches!(
            tree.check_participants(),
            Err(ImportError::ParticipantMismatch(_))
        ));
    }
}
