//! Acquisition metadata extraction
//!
//! Extractors read instrument parameters and sensor positions that are not in
//! the JSON sidecar. Their parameters are stored after the sidecar ones.

use crate::dataset::acquisition::Acquisition;
use crate::dataset::sidecar::Metadata;
use crate::dataset::tsv::{cell, required_cell, TsvFile};
use crate::error::{ImportError, ImportResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// One sensor with its 3D position
#[derive(Debug, Clone, PartialEq)]
pub struct SensorPosition {
    pub label: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl SensorPosition {
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtractedMetadata {
    pub parameters: Metadata,
    pub sensors: Vec<SensorPosition>,
}

/// Source of acquisition metadata beyond the JSON sidecar
#[async_trait]
pub trait MetadataExtractor: Send + Sync {
    /// Extractor identifier, for logs
    fn name(&self) -> &'static str;

    /// Fails with `MetadataExtractionFailed` when the acquisition cannot be read
    async fn extract(&self, acquisition: &Acquisition) -> ImportResult<ExtractedMetadata>;
}

/// Extractor that finds nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExtractor;

#[async_trait]
impl MetadataExtractor for NoopExtractor {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn extract(&self, _acquisition: &Acquisition) -> ImportResult<ExtractedMetadata> {
        Ok(ExtractedMetadata::default())
    }
}

/// Reads sensor positions from the `*_electrodes.tsv` next to a recording
///
/// The table must share the recording's subject and session entities.
/// Recordings without one yield no sensors.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElectrodesTableExtractor;

impl ElectrodesTableExtractor {
    fn find_table(acquisition: &Acquisition) -> ImportResult<Option<PathBuf>> {
        let Some(dir) = acquisition.path.parent() else {
            return Ok(None);
        };
        let prefix = entity_prefix(&acquisition.name);

        for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str() else { continue };
            if name.starts_with(&prefix) && name.ends_with("_electrodes.tsv") {
                return Ok(Some(entry.path().to_path_buf()));
            }
        }
        Ok(None)
    }

    fn read_sensors(path: &Path) -> ImportResult<Vec<SensorPosition>> {
        let table = TsvFile::read(path)?;
        let mut sensors = Vec::with_capacity(table.rows.len());

        for row in &table.rows {
            let label = required_cell(row, "name", path)?;
            let coordinate = |column: &str| -> f64 {
                cell(row, column)
                    .and_then(|value| value.parse::<f64>().ok())
                    .unwrap_or(f64::NAN)
            };
            sensors.push(SensorPosition {
                label: label.to_string(),
                x: coordinate("x"),
                y: coordinate("y"),
                z: coordinate("z"),
            });
        }
        Ok(sensors)
    }
}

#[async_trait]
impl MetadataExtractor for ElectrodesTableExtractor {
    fn name(&self) -> &'static str {
        "electrodes-table"
    }

    async fn extract(&self, acquisition: &Acquisition) -> ImportResult<ExtractedMetadata> {
        let failed = |e: ImportError| {
            ImportError::MetadataExtractionFailed(format!("{}: {}", acquisition.name, e))
        };

        let Some(table) = Self::find_table(acquisition).map_err(failed)? else {
            return Ok(ExtractedMetadata::default());
        };
        let sensors = Self::read_sensors(&table).map_err(failed)?;
        debug!(table = %table.display(), sensors = sensors.len(), "Read electrode positions");

        Ok(ExtractedMetadata {
            parameters: Metadata::new(),
            sensors,
        })
    }
}

/// Leading `sub-*` and `ses-*` entities of a file name, with a trailing `_`
fn entity_prefix(name: &str) -> String {
    let mut prefix = String::new();
    for entity in name.split('_') {
        if entity.starts_with("sub-") || entity.starts_with("ses-") {
            prefix.push_str(entity);
            prefix.push('_');
        } else {
            break;
        }
    }
    prefix
}
