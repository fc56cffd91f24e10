//! Canonical file placement
//!
//! Every catalog file path is relative to the catalog data root. In copy mode
//! acquisitions are copied under a managed root
//! (`bids_imports/<Name>_BIDSVersion_<version>`); in no-copy mode they are
//! referenced where they are, so the dataset must lie under the data root.
//!
//! Recording directories (CTF `.ds`) are stored as `<name>.ds.tar.gz` archives
//! in the managed copy.

use crate::dataset::tsv::TsvFile;
use crate::dataset::DatasetTree;
use crate::error::{ImportError, ImportResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Directory under the data root holding managed dataset copies
pub const MANAGED_IMPORTS_DIR: &str = "bids_imports";

/// Extension of archived recording directories
pub const ARCHIVE_EXTENSION: &str = ".tar.gz";

static SUBJECT_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"sub-[a-zA-Z0-9]+").expect("subject token regex"));
static SESSION_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"ses-[a-zA-Z0-9]+").expect("session token regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
enum Destination {
    /// Files stay in the dataset; `offset` is the dataset root relative to
    /// the data root
    InPlace { offset: PathBuf },
    /// Files are copied under `root` (relative to the data root)
    Managed { root: PathBuf, derivative: bool },
}

/// Catalog identity of the visit owning a file
#[derive(Debug, Clone, Copy)]
pub struct PlacementTarget<'a> {
    pub subject_label: &'a str,
    pub visit_label: &'a str,
    pub data_type: &'a str,
}

/// Path decisions and copies for one dataset
#[derive(Debug, Clone)]
pub struct FilePlacement {
    data_dir: PathBuf,
    dataset_root: PathBuf,
    destination: Destination,
}

impl FilePlacement {
    /// Reference files in place
    ///
    /// Fails with `UnreadableDataset` when the dataset is not under the data
    /// root, since its files could not be addressed relative to it.
    pub fn in_place(data_dir: &Path, dataset_root: &Path) -> ImportResult<Self> {
        let data_dir_abs = data_dir.canonicalize()?;
        let dataset_abs = dataset_root.canonicalize()?;
        let offset = dataset_abs
            .strip_prefix(&data_dir_abs)
            .map_err(|_| {
                ImportError::UnreadableDataset(format!(
                    "'{}' is not under the data root '{}'; no-copy imports need it there",
                    dataset_root.display(),
                    data_dir.display()
                ))
            })?
            .to_path_buf();

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            dataset_root: dataset_root.to_path_buf(),
            destination: Destination::InPlace { offset },
        })
    }

    /// Copy files under `managed_root`, given relative to the data root
    pub fn managed(
        data_dir: &Path,
        dataset_root: &Path,
        managed_root: &Path,
        derivative: bool,
    ) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            dataset_root: dataset_root.to_path_buf(),
            destination: Destination::Managed {
                root: managed_root.to_path_buf(),
                derivative,
            },
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn copies_files(&self) -> bool {
        matches!(self.destination, Destination::Managed { .. })
    }

    /// Absolute location of a catalog-relative path
    pub fn absolute(&self, relative: &Path) -> PathBuf {
        self.data_dir.join(relative)
    }

    /// Catalog path of a dataset file
    pub fn canonical_path(&self, target: PlacementTarget<'_>, source: &Path) -> ImportResult<PathBuf> {
        let relative = source.strip_prefix(&self.dataset_root).map_err(|_| {
            ImportError::invalid_data(source.display(), "file is outside the dataset root")
        })?;

        match &self.destination {
            Destination::InPlace { offset } => Ok(offset.join(relative)),
            Destination::Managed { root, derivative: true } => Ok(root.join(relative)),
            Destination::Managed { root, derivative: false } => {
                let file_name = source
                    .file_name()
                    .and_then(|name| name.to_str())
                    .ok_or_else(|| ImportError::invalid_data(source.display(), "file name is not UTF-8"))?;

                Ok(root
                    .join(format!("sub-{}", target.subject_label))
                    .join(format!("ses-{}", target.visit_label))
                    .join(target.data_type)
                    .join(rewrite_file_name(file_name, target.subject_label, target.visit_label)))
            }
        }
    }

    /// Catalog path of an acquisition's primary file
    ///
    /// Same as [`canonical_path`](Self::canonical_path), except that copied
    /// directories get [`ARCHIVE_EXTENSION`].
    pub fn primary_path(&self, target: PlacementTarget<'_>, source: &Path) -> ImportResult<PathBuf> {
        let path = self.canonical_path(target, source)?;
        if self.copies_files() && source.is_dir() {
            Ok(with_archive_extension(&path))
        } else {
            Ok(path)
        }
    }

    /// Catalog path of a visit-level file such as scans.tsv, `None` in
    /// no-copy mode
    pub fn visit_file_path(
        &self,
        subject_label: &str,
        visit_label: &str,
        source: &Path,
    ) -> ImportResult<Option<PathBuf>> {
        let root = match &self.destination {
            Destination::InPlace { .. } => return Ok(None),
            Destination::Managed { root, derivative: true } => {
                let relative = source.strip_prefix(&self.dataset_root).map_err(|_| {
                    ImportError::invalid_data(source.display(), "file is outside the dataset root")
                })?;
                return Ok(Some(root.join(relative)));
            }
            Destination::Managed { root, derivative: false } => root,
        };

        let file_name = source
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ImportError::invalid_data(source.display(), "file name is not UTF-8"))?;
        Ok(Some(
            root.join(format!("sub-{}", subject_label))
                .join(format!("ses-{}", visit_label))
                .join(rewrite_file_name(file_name, subject_label, visit_label)),
        ))
    }

    /// Copy a file to its catalog path, archiving directories
    ///
    /// Does nothing in no-copy mode. Never overwrites: an existing destination
    /// fails with `AlreadyExists`. Returns the absolute path created, which a
    /// partial write never leaves behind.
    pub fn place(&self, source: &Path, relative_destination: &Path) -> ImportResult<Option<PathBuf>> {
        if !self.copies_files() {
            return Ok(None);
        }

        let destination = self.absolute(relative_destination);
        if destination.exists() {
            return Err(ImportError::AlreadyExists(destination.display().to_string()));
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }

        let written = if source.is_dir() {
            archive_dir(source, &destination)
        } else {
            fs::copy(source, &destination).map(|_| ()).map_err(ImportError::from)
        };
        if let Err(e) = written {
            if let Err(cleanup) = remove_path(&destination) {
                debug!(destination = %destination.display(), error = %cleanup, "Nothing to clean up");
            }
            return Err(e);
        }

        debug!(
            source = %source.display(),
            destination = %destination.display(),
            "Placed file"
        );
        Ok(Some(destination))
    }

    /// Copy a TSV table to its catalog path, or append the rows whose `key`
    /// value the existing copy lacks
    ///
    /// Does nothing in no-copy mode.
    pub fn merge_table(&self, source: &Path, relative_destination: &Path, key: &str) -> ImportResult<()> {
        if !self.copies_files() {
            return Ok(());
        }
        let destination = self.absolute(relative_destination);
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        merge_tsv(source, &destination, key)
    }
}

/// Destinations created while placing one acquisition
///
/// Discarded when the acquisition fails after placement started, so a rerun
/// does not stop on `AlreadyExists`.
#[derive(Debug, Default)]
pub struct PlacedFiles {
    created: Vec<PathBuf>,
}

impl PlacedFiles {
    pub fn record(&mut self, created: Option<PathBuf>) {
        self.created.extend(created);
    }

    /// Remove every recorded destination, newest first
    pub fn discard(self) {
        for path in self.created.into_iter().rev() {
            match remove_path(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed placed file"),
                Err(e) => warn!(path = %path.display(), error = %e, "Could not remove placed file"),
            }
        }
    }
}

/// Rewrite the subject and session tokens of a file name to catalog labels
pub fn rewrite_file_name(file_name: &str, subject_label: &str, visit_label: &str) -> String {
    let renamed = SUBJECT_TOKEN.replace_all(file_name, format!("sub-{}", subject_label).as_str());
    SESSION_TOKEN
        .replace_all(&renamed, format!("ses-{}", visit_label).as_str())
        .into_owned()
}

/// Catalog path as stored in the catalog (forward slashes)
pub fn catalog_path_string(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn with_archive_extension(path: &Path) -> PathBuf {
    let mut archived = path.as_os_str().to_os_string();
    archived.push(ARCHIVE_EXTENSION);
    PathBuf::from(archived)
}

pub fn is_archive(path: &Path) -> bool {
    path.to_str().map_or(false, |p| p.ends_with(ARCHIVE_EXTENSION))
}

/// Directory name stored inside an archive: its file name without the extension
fn archived_name(archive: &Path) -> ImportResult<&str> {
    archive
        .file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| name.strip_suffix(ARCHIVE_EXTENSION))
        .filter(|name| !name.is_empty())
        .ok_or_else(|| ImportError::invalid_data(archive.display(), "not a .tar.gz archive path"))
}

/// Write `source` as a gzipped tar holding one top-level directory
fn archive_dir(source: &Path, destination: &Path) -> ImportResult<()> {
    let name = archived_name(destination)?;
    let encoder = GzEncoder::new(fs::File::create(destination)?, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(name, source)?;
    builder.into_inner()?.finish()?;
    Ok(())
}

/// Unpack an archived recording under `into`; returns the recording directory
pub fn unpack_archive(archive: &Path, into: &Path) -> ImportResult<PathBuf> {
    let name = archived_name(archive)?;
    let mut unpacked = tar::Archive::new(GzDecoder::new(fs::File::open(archive)?));
    unpacked.unpack(into)?;
    Ok(into.join(name))
}

pub(crate) fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn merge_tsv(source: &Path, destination: &Path, key: &str) -> ImportResult<()> {
    if destination.is_file() {
        let mut existing = TsvFile::read(destination)?;
        let appended = existing.append_missing(&TsvFile::read(source)?, key);
        existing.write(destination)?;
        debug!(destination = %destination.display(), appended, "Merged table");
    } else {
        fs::copy(source, destination)?;
    }
    Ok(())
}

/// Create the managed copy root of a dataset and copy its top-level files
///
/// `dataset_description.json`, `README` and the dataset-level `events.json`
/// are overwritten; an existing `participants.tsv` gets the rows of
/// participants it does not list yet.
/// Returns the managed root relative to the data root.
pub fn prepare_managed_root(data_dir: &Path, tree: &DatasetTree) -> ImportResult<PathBuf> {
    let description = tree.description().ok_or_else(|| {
        ImportError::missing_field(
            "dataset_description.json",
            format!("managed copy of '{}'", tree.root().display()),
        )
    })?;

    let relative_root = Path::new(MANAGED_IMPORTS_DIR).join(description.managed_dir_name());
    let root = data_dir.join(&relative_root);
    fs::create_dir_all(&root)?;

    for name in ["dataset_description.json", "README", "events.json"] {
        let source = tree.root().join(name);
        if source.is_file() {
            fs::copy(&source, root.join(name))?;
        }
    }

    let source_participants = tree.root().join("participants.tsv");
    if source_participants.is_file() {
        merge_tsv(&source_participants, &root.join("participants.tsv"), "participant_id")?;
    }

    info!(root = %root.display(), "Prepared managed dataset root");
    Ok(relative_root)
}

/// SHA-256 of a file, or of every file under a directory in name order
pub async fn hash_path(path: &Path) -> ImportResult<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash_path_blocking(&path))
        .await
        .map_err(|e| dsi_common::Error::Internal(format!("Hash task failed: {}", e)))?
}

fn hash_path_blocking(path: &Path) -> ImportResult<String> {
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024];

    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let mut file = fs::File::open(entry.path())?;
        loop {
            let read = file.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
    }

    Ok(format!("{:x}", hasher.finalize()))
}
