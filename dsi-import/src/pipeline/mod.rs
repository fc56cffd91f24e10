//! Per-acquisition import
//!
//! **Steps**, each a gate for the next:
//! 1. Resolve modality, output type and file type (failures grouped)
//! 2. Compute the canonical path; a known path ends the import as `Skipped`
//! 3. Check sidecars (missing optional ones are only logged)
//! 4. Insert the file row and its parameters
//! 5. Ingest sidecar tables (electrophysiology: channels, then events)
//! 6. Place sidecars and the primary file (recording directories are archived)
//! 7. Commit
//! 8. Chunk the source recording, when enabled and the file type has a command
//! 9. Commit the chunk parameter
//!
//! A failure before step 7 leaves the unit of work uncommitted; the caller
//! rolls it back. Files placed by a failed step 6 or 7 are removed again.

pub mod channels;
pub mod events;
pub mod parameters;

use crate::catalog::{Catalog, Vocabulary};
use crate::chunking::ChunkingInvoker;
use crate::dataset::acquisition::{Acquisition, AcquisitionFiles, DataTypeFamily, MriFiles, PhysioFiles};
use crate::dataset::dictionary::DataDictionary;
use crate::dataset::scans::{ScansFile, TIMESTAMP_FORMAT};
use crate::dataset::sidecar::{read_metadata, Metadata, MetadataValue};
use crate::dataset::DatasetType;
use crate::error::{ImportError, ImportResult};
use crate::error_group::group_three;
use crate::hed::HedVocabulary;
use crate::metadata::MetadataExtractor;
use crate::placement::{catalog_path_string, hash_path, FilePlacement, PlacedFiles, PlacementTarget};
use crate::report::{ImportOutcome, RunReport};
use dsi_common::db::{
    CatalogSubject, CatalogVisit, NewElectrode, NewPlacedFile, ParameterScope, PlacedFile,
    TagSource,
};
use parameters::{apply_aliases, store_metadata, store_parameter, HASH_PARAMETER, MRI_CATEGORY, PHYSIO_CATEGORY};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Run-wide collaborators shared by every acquisition
pub struct PipelineContext<'a> {
    pub placement: &'a FilePlacement,
    pub dataset_type: DatasetType,
    pub vocabulary: &'a HedVocabulary,
    pub extractor: &'a dyn MetadataExtractor,
    pub chunker: Option<&'a ChunkingInvoker>,
    pub inserted_by: &'a str,
}

/// Catalog owner and dataset location of one data-type directory
#[derive(Debug, Clone, Copy)]
pub struct AcquisitionOwner<'a> {
    pub subject: &'a CatalogSubject,
    pub visit: &'a CatalogVisit,
    pub data_type: &'a str,
    /// Directory of the scans.tsv listing the acquisition
    pub scans_dir: &'a Path,
    pub scans: Option<&'a ScansFile>,
}

impl AcquisitionOwner<'_> {
    fn target(&self) -> PlacementTarget<'_> {
        PlacementTarget {
            subject_label: &self.subject.label,
            visit_label: &self.visit.visit_label,
            data_type: self.data_type,
        }
    }
}

/// Per-family behaviour of the common import steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Modality {
    Mri,
    Electrophysiology,
}

impl Modality {
    fn of(acquisition: &Acquisition) -> Self {
        match acquisition.family() {
            DataTypeFamily::Mri => Modality::Mri,
            DataTypeFamily::Electrophysiology => Modality::Electrophysiology,
        }
    }

    fn category(&self) -> &'static str {
        match self {
            Modality::Mri => MRI_CATEGORY,
            Modality::Electrophysiology => PHYSIO_CATEGORY,
        }
    }
}

/// Imports one acquisition after another for a run
pub struct AcquisitionPipeline<'a> {
    context: PipelineContext<'a>,
}

struct TypeContext {
    modality_id: i64,
    output_type_id: i64,
    file_type: String,
}

impl<'a> AcquisitionPipeline<'a> {
    pub fn new(context: PipelineContext<'a>) -> Self {
        Self { context }
    }

    /// Import one acquisition
    ///
    /// `Skipped` is returned when the canonical path is already catalogued;
    /// nothing is written or copied in that case.
    pub async fn import<C: Catalog + ?Sized>(
        &self,
        catalog: &mut C,
        owner: AcquisitionOwner<'_>,
        acquisition: &Acquisition,
        report: &mut RunReport,
    ) -> ImportResult<ImportOutcome> {
        let modality = Modality::of(acquisition);
        let types = self.resolve_types(catalog, owner.data_type, acquisition).await?;

        let placement = self.context.placement;
        let canonical = placement.primary_path(owner.target(), &acquisition.path)?;
        let path = catalog_path_string(&canonical);
        if catalog.find_placed_file_by_path(&path).await?.is_some() {
            warn!(path = %path, "Already imported, skipping");
            return Ok(ImportOutcome::Skipped { path });
        }

        self.check_sidecars(acquisition)?;

        let file = catalog
            .insert_placed_file(&NewPlacedFile {
                path: path.clone(),
                file_type: types.file_type,
                visit_id: owner.visit.id,
                modality_id: types.modality_id,
                output_type_id: types.output_type_id,
                acquisition_time: self.acquisition_time(&owner, acquisition),
                inserted_by: self.context.inserted_by.to_string(),
            })
            .await?;

        self.store_parameters(catalog, modality, &file, acquisition).await?;

        if let AcquisitionFiles::Electrophysiology(files) = &acquisition.files {
            self.ingest_tables(catalog, owner, &file, files, report).await?;
        }

        let mut placed = PlacedFiles::default();
        if let Err(e) = self.place_and_commit(catalog, owner, acquisition, &canonical, &mut placed).await {
            placed.discard();
            return Err(e);
        }
        info!(file_id = file.id, path = %path, "Imported acquisition");

        if modality == Modality::Electrophysiology {
            if let Some(chunker) = self.context.chunker.filter(|c| c.is_enabled()) {
                if chunker.supports(&file.file_type) {
                    chunker.ensure_chunks(catalog, &file, &acquisition.path).await?;
                    catalog.commit().await?;
                } else {
                    debug!(file_type = %file.file_type, "No chunking command for file type");
                }
            }
        }

        Ok(ImportOutcome::Imported { file_id: file.id, path })
    }

    async fn place_and_commit<C: Catalog + ?Sized>(
        &self,
        catalog: &mut C,
        owner: AcquisitionOwner<'_>,
        acquisition: &Acquisition,
        canonical: &Path,
        placed: &mut PlacedFiles,
    ) -> ImportResult<()> {
        let placement = self.context.placement;
        for sidecar in acquisition.sidecar_paths() {
            let destination = placement.canonical_path(owner.target(), sidecar)?;
            placed.record(placement.place(sidecar, &destination)?);
        }
        placed.record(placement.place(&acquisition.path, canonical)?);

        catalog.commit().await
    }

    async fn resolve_types<C: Catalog + ?Sized>(
        &self,
        catalog: &mut C,
        data_type: &str,
        acquisition: &Acquisition,
    ) -> ImportResult<TypeContext> {
        let output_type = self.context.dataset_type.as_str();

        let modality = catalog
            .find_named(Vocabulary::Modality, data_type)
            .await
            .and_then(|found| found.ok_or_else(|| ImportError::NotFound(format!("modality '{}'", data_type))));
        let output = catalog
            .find_named(Vocabulary::OutputType, output_type)
            .await
            .and_then(|found| found.ok_or_else(|| ImportError::NotFound(format!("output type '{}'", output_type))));
        let file_type = catalog
            .find_file_type(&acquisition.file_type)
            .await
            .and_then(|found| {
                found.ok_or_else(|| ImportError::NotFound(format!("file type '{}'", acquisition.file_type)))
            });

        let (modality, output, file_type) =
            group_three(format!("acquisition '{}'", acquisition.name), modality, output, file_type)?;

        Ok(TypeContext {
            modality_id: modality.id,
            output_type_id: output.id,
            file_type,
        })
    }

    fn check_sidecars(&self, acquisition: &Acquisition) -> ImportResult<()> {
        match &acquisition.files {
            AcquisitionFiles::Electrophysiology(PhysioFiles { sidecar, channels, events, .. }) => {
                if sidecar.is_none() {
                    return Err(ImportError::missing_field(
                        format!("{}.json", acquisition.name),
                        format!("acquisition '{}'", acquisition.name),
                    ));
                }
                if channels.is_none() {
                    warn!(acquisition = %acquisition.name, "No channels.tsv");
                }
                if events.is_none() {
                    warn!(acquisition = %acquisition.name, "No events.tsv");
                }
            }
            AcquisitionFiles::Mri(MriFiles { sidecar, .. }) => {
                if sidecar.is_none() {
                    warn!(acquisition = %acquisition.name, "No JSON sidecar");
                }
            }
        }
        Ok(())
    }

    fn acquisition_time(&self, owner: &AcquisitionOwner<'_>, acquisition: &Acquisition) -> Option<String> {
        let scans = owner.scans?;
        let relative = acquisition.path.strip_prefix(owner.scans_dir).ok()?;
        scans
            .acquisition_time(&catalog_path_string(relative))
            .map(|time| time.format(TIMESTAMP_FORMAT).to_string())
    }

    async fn store_parameters<C: Catalog + ?Sized>(
        &self,
        catalog: &mut C,
        modality: Modality,
        file: &PlacedFile,
        acquisition: &Acquisition,
    ) -> ImportResult<()> {
        let scope = ParameterScope::File(file.id);
        let category = modality.category();

        let mut metadata = match sidecar_path(acquisition) {
            Some(path) => read_metadata(path)?,
            None => Metadata::new(),
        };
        if let AcquisitionFiles::Mri(MriFiles { suffix: Some(suffix), .. }) = &acquisition.files {
            metadata
                .entry("acquisition_suffix".to_string())
                .or_insert_with(|| MetadataValue::from(suffix.as_str()));
        }

        let extracted = self.context.extractor.extract(acquisition).await?;
        for (key, value) in extracted.parameters {
            metadata.entry(key).or_insert(value);
        }

        let aliases = catalog.aliased_parameter_types().await?;
        store_metadata(catalog, scope, category, &apply_aliases(&metadata, &aliases)).await?;

        let hash = hash_path(&acquisition.path).await?;
        store_parameter(catalog, scope, category, HASH_PARAMETER, Some(&hash)).await?;

        let mut skipped = 0;
        for sensor in &extracted.sensors {
            if !sensor.is_finite() {
                skipped += 1;
                continue;
            }
            catalog
                .insert_electrode(&NewElectrode {
                    file_id: file.id,
                    name: sensor.label.clone(),
                    x: sensor.x,
                    y: sensor.y,
                    z: sensor.z,
                })
                .await?;
        }
        if skipped > 0 {
            debug!(
                extractor = self.context.extractor.name(),
                skipped, "Skipped sensors without a finite position"
            );
        }

        Ok(())
    }

    async fn ingest_tables<C: Catalog + ?Sized>(
        &self,
        catalog: &mut C,
        owner: AcquisitionOwner<'_>,
        file: &PlacedFile,
        files: &PhysioFiles,
        report: &mut RunReport,
    ) -> ImportResult<()> {
        let placement = self.context.placement;
        let table_path = |path: &PathBuf| -> ImportResult<String> {
            Ok(catalog_path_string(&placement.canonical_path(owner.target(), path)?))
        };

        if let Some(channels) = &files.channels {
            let path = table_path(channels)?;
            channels::ingest_channels(catalog, file.id, channels, &path, report).await?;
        }

        if let Some(events) = &files.events {
            let path = table_path(events)?;
            events::ingest_events(catalog, file.id, events, &path, self.context.vocabulary).await?;

            match &files.events_dictionary {
                Some(dictionary) => {
                    let dictionary = DataDictionary::read(dictionary)?;
                    events::store_dictionary_tags(
                        catalog,
                        TagSource::File(file.id),
                        &dictionary,
                        self.context.vocabulary,
                    )
                    .await?;
                }
                None => warn!(events = %events.display(), "No events.json data dictionary"),
            }
        }

        Ok(())
    }
}

fn sidecar_path(acquisition: &Acquisition) -> Option<&Path> {
    match &acquisition.files {
        AcquisitionFiles::Mri(files) => files.sidecar.as_deref(),
        AcquisitionFiles::Electrophysiology(files) => files.sidecar.as_deref(),
    }
}
