//! Acquisition discovery inside a data-type directory

use crate::error::ImportResult;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Data-type directories holding MRI images
pub const MRI_DATA_TYPES: [&str; 4] = ["anat", "dwi", "fmap", "func"];

/// Data-type directories holding electrophysiology recordings
pub const PHYSIO_DATA_TYPES: [&str; 3] = ["eeg", "ieeg", "meg"];

/// Recording extensions and the catalog file type of each
const PHYSIO_RECORDINGS: [(&str, &str); 5] = [
    (".ds", "ctf"),
    (".edf", "edf"),
    (".set", "set"),
    (".vhdr", "vhdr"),
    (".bdf", "bdf"),
];

/// Supported data-type families
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataTypeFamily {
    Mri,
    Electrophysiology,
}

impl DataTypeFamily {
    pub fn of(data_type: &str) -> Option<Self> {
        if MRI_DATA_TYPES.contains(&data_type) {
            Some(DataTypeFamily::Mri)
        } else if PHYSIO_DATA_TYPES.contains(&data_type) {
            Some(DataTypeFamily::Electrophysiology)
        } else {
            None
        }
    }
}

/// Sidecars of an MRI image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MriFiles {
    pub sidecar: Option<PathBuf>,
    pub bval: Option<PathBuf>,
    pub bvec: Option<PathBuf>,
    /// Trailing `_<suffix>` of the acquisition name (`T1w`, `bold`, ...)
    pub suffix: Option<String>,
}

/// Sidecars of an electrophysiology recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhysioFiles {
    /// Required `<name>.json`; `None` when absent on disk
    pub sidecar: Option<PathBuf>,
    pub channels: Option<PathBuf>,
    pub events: Option<PathBuf>,
    /// `*_events.json` data dictionary of the events table
    pub events_dictionary: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionFiles {
    Mri(MriFiles),
    Electrophysiology(PhysioFiles),
}

/// One recorded data file and its sidecars
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acquisition {
    /// File name without extensions
    pub name: String,
    /// Primary file, or directory for CTF recordings
    pub path: PathBuf,
    /// Catalog file type (`nii`, `ctf`, `edf`, ...)
    pub file_type: String,
    pub files: AcquisitionFiles,
}

impl Acquisition {
    pub fn family(&self) -> DataTypeFamily {
        match self.files {
            AcquisitionFiles::Mri(_) => DataTypeFamily::Mri,
            AcquisitionFiles::Electrophysiology(_) => DataTypeFamily::Electrophysiology,
        }
    }

    /// Sidecar files present on disk, in placement order
    pub fn sidecar_paths(&self) -> Vec<&Path> {
        let paths = match &self.files {
            AcquisitionFiles::Mri(files) => vec![&files.sidecar, &files.bval, &files.bvec],
            AcquisitionFiles::Electrophysiology(files) => vec![
                &files.sidecar,
                &files.channels,
                &files.events,
                &files.events_dictionary,
            ],
        };
        paths.into_iter().flatten().map(PathBuf::as_path).collect()
    }
}

/// Find the acquisitions of one data-type directory, in directory order
pub fn discover(dir: &Path, family: DataTypeFamily) -> ImportResult<Vec<Acquisition>> {
    let mut acquisitions = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        let Some(file_name) = entry.file_name().to_str() else {
            continue;
        };

        let acquisition = match family {
            DataTypeFamily::Mri => mri_acquisition(dir, entry.path(), file_name),
            DataTypeFamily::Electrophysiology => physio_acquisition(dir, entry.path(), file_name),
        };
        acquisitions.extend(acquisition);
    }

    Ok(acquisitions)
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    path.exists().then_some(path)
}

fn mri_acquisition(dir: &Path, path: &Path, file_name: &str) -> Option<Acquisition> {
    if !path.is_file() {
        return None;
    }
    let name = file_name
        .strip_suffix(".nii.gz")
        .or_else(|| file_name.strip_suffix(".nii"))?;

    let suffix = name
        .rsplit_once('_')
        .map(|(_, suffix)| suffix)
        .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_string);

    Some(Acquisition {
        name: name.to_string(),
        path: path.to_path_buf(),
        file_type: "nii".to_string(),
        files: AcquisitionFiles::Mri(MriFiles {
            sidecar: existing(dir.join(format!("{}.json", name))),
            bval: existing(dir.join(format!("{}.bval", name))),
            bvec: existing(dir.join(format!("{}.bvec", name))),
            suffix,
        }),
    })
}

fn physio_acquisition(dir: &Path, path: &Path, file_name: &str) -> Option<Acquisition> {
    let (name, file_type) = PHYSIO_RECORDINGS.iter().find_map(|(extension, file_type)| {
        file_name
            .strip_suffix(extension)
            .map(|name| (name, *file_type))
    })?;

    // CTF recordings are directories; everything else is a file
    if (file_type == "ctf") != path.is_dir() {
        return None;
    }

    let prefix = ["_meg", "_ieeg", "_eeg"]
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))?;

    let events = existing(dir.join(format!("{}_events.tsv", prefix)));
    let events_dictionary = events
        .as_ref()
        .and_then(|_| existing(dir.join(format!("{}_events.json", prefix))));

    Some(Acquisition {
        name: name.to_string(),
        path: path.to_path_buf(),
        file_type: file_type.to_string(),
        files: AcquisitionFiles::Electrophysiology(PhysioFiles {
            sidecar: existing(dir.join(format!("{}.json", name))),
            channels: existing(dir.join(format!("{}_channels.tsv", prefix))),
            events,
            events_dictionary,
        }),
    })
}
