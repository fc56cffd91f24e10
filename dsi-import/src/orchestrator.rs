//! Import run orchestration
//!
//! **Run order:**
//! 1. Open the dataset tree and run the structural pre-checks (fatal)
//! 2. Prepare the managed root (copy mode)
//! 3. Resolve every subject, then every visit, and commit them together
//! 4. Store dataset-level HED tags against the project
//! 5. Per visit, copy or merge its scans.tsv (copy mode), then import every
//!    acquisition, one unit of work each
//!
//! Subjects and visits must be committed before any acquisition is imported,
//! since file rows reference them. Per-item failures are grouped into the run
//! report; only fatal failures end the run early.

use crate::catalog::Catalog;
use crate::chunking::ChunkingInvoker;
use crate::dataset::dictionary::DataDictionary;
use crate::dataset::scans::{ScansFile, FILENAME_COLUMN};
use crate::dataset::{DataTypeNode, DatasetTree, DatasetType, OpenOptions, VisitInfo};
use crate::error::{ImportError, ImportResult};
use crate::error_group::ErrorGroup;
use crate::hed::HedVocabulary;
use crate::metadata::MetadataExtractor;
use crate::pipeline::events::store_dictionary_tags;
use crate::pipeline::{AcquisitionOwner, AcquisitionPipeline, PipelineContext};
use crate::placement::{prepare_managed_root, FilePlacement};
use crate::report::RunReport;
use crate::resolve::{resolve_or_create_subject, resolve_or_create_visit, REGISTERED_BY};
use dsi_common::config::ImportConfig;
use dsi_common::db::{CatalogSubject, CatalogVisit, TagSource};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Per-run switches
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub dataset_dir: PathBuf,
    /// Overrides the type given by dataset_description.json
    pub dataset_type: Option<DatasetType>,
    /// Check the dataset layout before importing
    pub validate: bool,
    /// Check the `<label>_<identifier>` dataset directory name
    pub ids_validation: bool,
    pub create_subject: bool,
    pub create_visit: bool,
    /// Copy files under the managed root (false: reference them in place)
    pub copy_files: bool,
}

impl ImportOptions {
    pub fn new(dataset_dir: &Path) -> Self {
        Self {
            dataset_dir: dataset_dir.to_path_buf(),
            dataset_type: None,
            validate: true,
            ids_validation: false,
            create_subject: false,
            create_visit: false,
            copy_files: true,
        }
    }
}

/// (subject label, dataset visit label)
type VisitKey = (String, Option<String>);

fn visit_key(info: &VisitInfo) -> VisitKey {
    (info.subject.label.clone(), info.visit_label.clone())
}

/// Resolved catalog owners, in dataset order
type ResolvedVisits = IndexMap<VisitKey, (CatalogSubject, CatalogVisit)>;

pub struct Importer<'a> {
    config: &'a ImportConfig,
    data_dir: PathBuf,
    extractor: &'a dyn MetadataExtractor,
}

impl<'a> Importer<'a> {
    pub fn new(config: &'a ImportConfig, data_dir: &Path, extractor: &'a dyn MetadataExtractor) -> Self {
        Self {
            config,
            data_dir: data_dir.to_path_buf(),
            extractor,
        }
    }

    /// Import a dataset
    ///
    /// Returns the report of a completed run, even when per-item failures
    /// were collected. Fails only on fatal errors.
    pub async fn run<C: Catalog + ?Sized>(
        &self,
        catalog: &mut C,
        options: &ImportOptions,
    ) -> ImportResult<RunReport> {
        let mut report = RunReport::new();
        info!(
            run_id = %report.run_id,
            dataset = %options.dataset_dir.display(),
            copy = options.copy_files,
            "Starting import"
        );

        let tree = DatasetTree::open(
            &options.dataset_dir,
            &OpenOptions {
                validate: options.validate,
                dataset_type: options.dataset_type,
            },
        )?;
        tree.check_participants()?;
        if options.ids_validation {
            validate_identifiers(catalog, tree.root()).await?;
        }

        let placement = if options.copy_files {
            let managed_root = prepare_managed_root(&self.data_dir, &tree)?;
            FilePlacement::managed(
                &self.data_dir,
                tree.root(),
                &managed_root,
                tree.dataset_type() == DatasetType::Derivative,
            )
        } else {
            FilePlacement::in_place(&self.data_dir, tree.root())?
        };

        let visits = self.resolve_entities(catalog, &tree, options, &mut report).await?;
        catalog.commit().await?;
        info!(visits = visits.len(), "Resolved subjects and visits");

        let tags = catalog.hed_tags().await?;
        let vocabulary = HedVocabulary::new(tags.into_iter().map(|tag| (tag.name, tag.id)));
        debug!(tags = vocabulary.len(), "Loaded HED vocabulary");

        self.store_dataset_tags(catalog, &tree, &visits, &vocabulary, &mut report)
            .await?;

        let chunker = ChunkingInvoker::new(&self.data_dir, self.config.chunking.clone());
        let pipeline = AcquisitionPipeline::new(PipelineContext {
            placement: &placement,
            dataset_type: tree.dataset_type(),
            vocabulary: &vocabulary,
            extractor: self.extractor,
            chunker: Some(&chunker),
            inserted_by: REGISTERED_BY,
        });

        for subject in tree.subjects()? {
            let sessions = subject.sessions()?;
            if sessions.is_empty() {
                let scans = subject.scans()?;
                let key = (subject.info.label.clone(), None);
                self.place_scans(&placement, &visits, &key, scans.as_ref(), &mut report);
                let nodes = subject.data_types()?;
                self.import_data_types(catalog, &pipeline, &chunker, &visits, &nodes, scans.as_ref(), &mut report)
                    .await?;
            } else {
                for session in sessions {
                    self.place_scans(&placement, &visits, &visit_key(&session.info), session.scans()?, &mut report);
                    let nodes: Vec<&DataTypeNode> = session.data_types()?.iter().collect();
                    self.import_data_types(catalog, &pipeline, &chunker, &visits, &nodes, session.scans()?, &mut report)
                        .await?;
                }
            }
        }

        report.finish();
        Ok(report)
    }

    /// Resolve subjects, then visits of the subjects that resolved
    ///
    /// Nothing is committed here.
    async fn resolve_entities<C: Catalog + ?Sized>(
        &self,
        catalog: &mut C,
        tree: &DatasetTree,
        options: &ImportOptions,
        report: &mut RunReport,
    ) -> ImportResult<ResolvedVisits> {
        let mut subjects = ErrorGroup::new();
        for node in tree.subjects()? {
            match resolve_or_create_subject(catalog, &node.info, options.create_subject, REGISTERED_BY).await {
                Ok(subject) => {
                    subjects.record(Ok((node, subject)));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => subjects.push_error(e),
            }
        }
        let (subjects, failure) = subjects.into_parts("subjects");
        if let Some(failure) = failure {
            report.record_failure(&failure);
        }

        let default_label = self.config.default_visit_label.as_deref();
        let mut visits = ResolvedVisits::new();
        let mut failures = ErrorGroup::<()>::new();

        for (node, subject) in subjects {
            let sessions = node.sessions()?;
            let infos: Vec<VisitInfo> = if sessions.is_empty() {
                vec![VisitInfo {
                    subject: node.info.clone(),
                    visit_label: None,
                }]
            } else {
                sessions.iter().map(|session| session.info.clone()).collect()
            };

            for info in infos {
                match resolve_or_create_visit(catalog, &subject, &info, options.create_visit, default_label).await {
                    Ok(visit) => {
                        visits.insert(visit_key(&info), (subject.clone(), visit));
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => failures.push_error(e),
                }
            }
        }
        if let Err(failure) = failures.finish("visits") {
            report.record_failure(&failure);
        }

        Ok(visits)
    }

    /// Store the HED annotations of the dataset-level events.json
    ///
    /// They belong to the project of the first resolved visit.
    async fn store_dataset_tags<C: Catalog + ?Sized>(
        &self,
        catalog: &mut C,
        tree: &DatasetTree,
        visits: &ResolvedVisits,
        vocabulary: &HedVocabulary,
        report: &mut RunReport,
    ) -> ImportResult<()> {
        let path = tree.root().join("events.json");
        if !path.is_file() {
            warn!(dataset = %tree.root().display(), "No dataset-level events.json");
            return Ok(());
        }
        let Some((_, visit)) = visits.values().next() else {
            debug!("No resolved visit to attach dataset-level tags to");
            return Ok(());
        };

        let stored = match DataDictionary::read(&path) {
            Ok(dictionary) => {
                store_dictionary_tags(catalog, TagSource::Project(visit.project_id), &dictionary, vocabulary)
                    .await
            }
            Err(e) => Err(e),
        };

        match stored {
            Ok(members) => {
                catalog.commit().await?;
                info!(project_id = visit.project_id, members, "Stored dataset-level HED tags");
            }
            Err(e) => {
                catalog.rollback().await?;
                if e.is_fatal() {
                    return Err(e);
                }
                report.record_failure(&e);
            }
        }
        Ok(())
    }

    /// Copy a visit's scans.tsv into the managed copy, or add the rows the
    /// copy lacks when an earlier import already placed one
    fn place_scans(
        &self,
        placement: &FilePlacement,
        visits: &ResolvedVisits,
        key: &VisitKey,
        scans: Option<&ScansFile>,
        report: &mut RunReport,
    ) {
        let (Some(scans), Some((subject, visit))) = (scans, visits.get(key)) else {
            return;
        };
        let placed = placement
            .visit_file_path(&subject.label, &visit.visit_label, scans.path())
            .and_then(|destination| match destination {
                Some(destination) => placement.merge_table(scans.path(), &destination, FILENAME_COLUMN),
                None => Ok(()),
            });
        if let Err(e) = placed {
            report.record_failure(&ImportError::Grouped {
                label: format!("scans file '{}'", scans.path().display()),
                errors: vec![e],
            });
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn import_data_types<C: Catalog + ?Sized>(
        &self,
        catalog: &mut C,
        pipeline: &AcquisitionPipeline<'_>,
        chunker: &ChunkingInvoker,
        visits: &ResolvedVisits,
        nodes: &[&DataTypeNode],
        scans: Option<&ScansFile>,
        report: &mut RunReport,
    ) -> ImportResult<()> {
        for node in nodes {
            let Some((subject, visit)) = visits.get(&visit_key(&node.info.visit)) else {
                debug!(path = %node.path.display(), "Owner not resolved, skipping data type");
                continue;
            };
            if node.family().is_none() {
                warn!(data_type = %node.info.data_type, path = %node.path.display(), "Unsupported data type, skipping");
                continue;
            }

            let mut failures = ErrorGroup::<()>::new();
            for acquisition in node.acquisitions()? {
                let owner = AcquisitionOwner {
                    subject,
                    visit,
                    data_type: &node.info.data_type,
                    scans_dir: &node.scans_dir,
                    scans,
                };

                match pipeline.import(catalog, owner, acquisition, report).await {
                    Ok(outcome) => report.record_outcome(&outcome),
                    Err(e) => {
                        catalog.rollback().await?;
                        if e.is_fatal() || (chunker.fail_fast() && e.is_chunking()) {
                            return Err(e);
                        }
                        failures.push_error(e);
                    }
                }
            }

            if let Err(failure) = failures.finish(format!("acquisitions in '{}'", node.path.display())) {
                report.record_failure(&failure);
            }
        }
        Ok(())
    }
}

/// Check a `<label>_<identifier>` dataset directory against the catalog
pub async fn validate_identifiers<C: Catalog + ?Sized>(catalog: &mut C, root: &Path) -> ImportResult<()> {
    let name = root
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| ImportError::IdentifierMismatch(format!("'{}' has no directory name", root.display())))?;

    let (label, identifier) = name
        .rsplit_once('_')
        .and_then(|(label, id)| id.parse::<i64>().ok().map(|id| (label, id)))
        .ok_or_else(|| {
            ImportError::IdentifierMismatch(format!(
                "dataset directory '{}' is not named <label>_<identifier>",
                name
            ))
        })?;

    let subject = catalog
        .find_subject_by_cand_id(identifier)
        .await?
        .ok_or_else(|| ImportError::NotFound(format!("subject with identifier {}", identifier)))?;

    if subject.label != label {
        return Err(ImportError::IdentifierMismatch(format!(
            "identifier {} belongs to subject '{}', not '{}'",
            identifier, subject.label, label
        )));
    }
    Ok(())
}
