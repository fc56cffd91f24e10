//! Visualization chunking
//!
//! Chunks are produced by external executables, one per recording format:
//!
//! ```text
//! <command> <source> --destination <chunk dir> [--channel-count N]
//! ```
//!
//! A run counts as successful only if `<chunk dir>/<stem>.chunks` exists
//! afterwards, whatever the exit status. The output path is recorded as a file
//! parameter, which also makes chunking idempotent.
//!
//! During an import the source is the dataset's own recording. Catalogued
//! recordings stored as `.tar.gz` archives are unpacked next to their chunks
//! for the duration of the run.

use crate::catalog::Catalog;
use crate::error::{ImportError, ImportResult};
use crate::error_group::ErrorGroup;
use crate::pipeline::parameters::{store_parameter, PHYSIO_CATEGORY};
use crate::placement::{catalog_path_string, is_archive, remove_path, unpack_archive};
use crate::report::{ImportOutcome, RunReport};
use dsi_common::config::ChunkingConfig;
use dsi_common::db::{ParameterScope, PlacedFile};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// File parameter holding the chunk directory
pub const CHUNK_PATH_PARAMETER: &str = "electrophysiology_chunked_dataset_path";

/// File types whose command accepts `--channel-count`
const CHANNEL_COUNT_TYPES: [&str; 1] = ["ctf"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Created(String),
    AlreadyChunked(String),
}

impl ChunkOutcome {
    pub fn path(&self) -> &str {
        match self {
            ChunkOutcome::Created(path) | ChunkOutcome::AlreadyChunked(path) => path,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkingInvoker {
    data_dir: PathBuf,
    config: ChunkingConfig,
}

impl ChunkingInvoker {
    pub fn new(data_dir: &Path, config: ChunkingConfig) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn fail_fast(&self) -> bool {
        self.config.fail_fast
    }

    pub fn supports(&self, file_type: &str) -> bool {
        self.config.commands.contains_key(file_type)
    }

    /// Chunk a catalogued file from `source` unless it already has chunks
    ///
    /// `source` is the recording the command reads; the chunk location derives
    /// from the catalog path. The chunk parameter is written but not committed.
    pub async fn ensure_chunks<C: Catalog + ?Sized>(
        &self,
        catalog: &mut C,
        file: &PlacedFile,
        source: &Path,
    ) -> ImportResult<ChunkOutcome> {
        let scope = ParameterScope::File(file.id);
        if let Some(existing) = catalog.parameter_value(scope, CHUNK_PATH_PARAMETER).await? {
            debug!(file_id = file.id, chunks = %existing, "Already chunked");
            return Ok(ChunkOutcome::AlreadyChunked(existing));
        }

        let command = self.config.commands.get(&file.file_type).ok_or_else(|| {
            ImportError::UnsupportedType(format!("no chunking command for file type '{}'", file.file_type))
        })?;

        let chunk_dir = self.chunk_dir(&file.path)?;
        tokio::fs::create_dir_all(&chunk_dir).await?;

        let mut invocation = Command::new(command);
        invocation.arg(source).arg("--destination").arg(&chunk_dir);
        if CHANNEL_COUNT_TYPES.contains(&file.file_type.as_str()) {
            invocation
                .arg("--channel-count")
                .arg(self.config.channel_count.to_string());
        }

        info!(file_id = file.id, command = %command, source = %source.display(), "Chunking");
        let status = invocation.status().await.map_err(|e| match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => {
                ImportError::ChunkingUnavailable(format!("'{}': {}", command, e))
            }
            _ => ImportError::Io(e),
        })?;

        let expected = chunk_dir.join(format!("{}.chunks", stem_without_extensions(&file.path)));
        if !expected.is_dir() {
            return Err(ImportError::ChunkingFailed(format!(
                "'{}' exited with {} and did not create '{}'",
                command,
                status,
                expected.display()
            )));
        }
        if !status.success() {
            warn!(file_id = file.id, %status, "Chunking command reported failure but produced output");
        }

        let recorded = match expected.strip_prefix(&self.data_dir) {
            Ok(relative) => catalog_path_string(relative),
            Err(_) => expected.display().to_string(),
        };
        store_parameter(catalog, scope, PHYSIO_CATEGORY, CHUNK_PATH_PARAMETER, Some(&recorded)).await?;

        Ok(ChunkOutcome::Created(recorded))
    }

    /// Chunk every catalogued file with an id in `smallest..=largest`
    ///
    /// Files of types without a chunking command are skipped; each file is
    /// committed on its own and failures are collected into the report.
    pub async fn chunk_range<C: Catalog + ?Sized>(
        &self,
        catalog: &mut C,
        smallest: i64,
        largest: i64,
    ) -> ImportResult<RunReport> {
        let mut report = RunReport::new();
        let mut failures: ErrorGroup<()> = ErrorGroup::new();

        for id in smallest..=largest {
            let Some(file) = catalog.find_placed_file(id).await? else {
                continue;
            };
            if !self.supports(&file.file_type) {
                debug!(file_id = id, file_type = %file.file_type, "No chunking command, skipping");
                continue;
            }

            match self.chunk_catalogued(catalog, &file).await {
                Ok(ChunkOutcome::Created(_)) => {
                    catalog.commit().await?;
                    report.record_outcome(&ImportOutcome::Imported {
                        file_id: file.id,
                        path: file.path.clone(),
                    });
                }
                Ok(ChunkOutcome::AlreadyChunked(_)) => {
                    report.record_outcome(&ImportOutcome::Skipped { path: file.path.clone() });
                }
                Err(e) => {
                    catalog.rollback().await?;
                    failures.push_error(e);
                }
            }
        }

        if let Err(e) = failures.finish(format!("chunking files {}..={}", smallest, largest)) {
            report.record_failure(&e);
        }
        report.finish();
        Ok(report)
    }

    /// Chunk a file from its catalogued copy, unpacking archives first
    async fn chunk_catalogued<C: Catalog + ?Sized>(
        &self,
        catalog: &mut C,
        file: &PlacedFile,
    ) -> ImportResult<ChunkOutcome> {
        let stored = self.data_dir.join(&file.path);
        if !is_archive(&stored) {
            return self.ensure_chunks(catalog, file, &stored).await;
        }
        if let Some(existing) = catalog
            .parameter_value(ParameterScope::File(file.id), CHUNK_PATH_PARAMETER)
            .await?
        {
            return Ok(ChunkOutcome::AlreadyChunked(existing));
        }

        let staging = self.chunk_dir(&file.path)?.join(format!(".unpacked-{}", file.id));
        let unpack_into = staging.clone();
        let source = tokio::task::spawn_blocking(move || unpack_archive(&stored, &unpack_into))
            .await
            .map_err(|e| dsi_common::Error::Internal(format!("Unpack task failed: {}", e)))??;
        debug!(file_id = file.id, source = %source.display(), "Unpacked archived recording");

        let outcome = self.ensure_chunks(catalog, file, &source).await;
        if let Err(e) = remove_path(&staging) {
            warn!(staging = %staging.display(), error = %e, "Could not remove unpacked recording");
        }
        outcome
    }

    /// `<chunk root or data_dir/<first segment>>/<second segment>_chunks`
    fn chunk_dir(&self, file_path: &str) -> ImportResult<PathBuf> {
        let mut segments = file_path.split('/').filter(|s| !s.is_empty());
        let (Some(first), Some(second)) = (segments.next(), segments.next()) else {
            return Err(ImportError::invalid_data(
                file_path,
                "path needs at least two segments to derive a chunk directory",
            ));
        };

        let base = match &self.config.chunk_root {
            Some(root) => root.clone(),
            None => self.data_dir.join(first),
        };
        Ok(base.join(format!("{}_chunks", second)))
    }
}

/// File name up to its first `.`
fn stem_without_extensions(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.split('.').next().unwrap_or(name)
}
