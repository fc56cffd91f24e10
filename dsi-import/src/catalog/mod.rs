//! Catalog repository interface
//!
//! The pipeline only talks to the catalog through [`Catalog`]. Inserts are
//! flushed immediately (the returned row carries its id) but only become
//! durable on [`Catalog::commit`]; the caller decides where units of work end.

pub mod sqlite;

use crate::error::ImportResult;
use async_trait::async_trait;
use dsi_common::db::{
    AliasedEntity, CatalogSubject, CatalogVisit, HedTag, NamedEntity, NewChannel, NewElectrode,
    NewEvent, NewPlacedFile, NewSubject, NewVisit, ParameterScope, ParameterType, PlacedFile,
    TagGroupRow, TagSource,
};

pub use sqlite::SqliteCatalog;

/// Name-keyed vocabularies with integer ids
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vocabulary {
    Modality,
    OutputType,
    ChannelType,
    StatusType,
    Cohort,
}

impl Vocabulary {
    pub fn table(&self) -> &'static str {
        match self {
            Vocabulary::Modality => "modalities",
            Vocabulary::OutputType => "output_types",
            Vocabulary::ChannelType => "channel_types",
            Vocabulary::StatusType => "status_types",
            Vocabulary::Cohort => "cohorts",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Vocabulary::Modality => "modality",
            Vocabulary::OutputType => "output type",
            Vocabulary::ChannelType => "channel type",
            Vocabulary::StatusType => "status type",
            Vocabulary::Cohort => "cohort",
        }
    }
}

/// Entities that may be referenced by name or alias
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasedVocabulary {
    Project,
    Site,
}

impl AliasedVocabulary {
    pub fn table(&self) -> &'static str {
        match self {
            AliasedVocabulary::Project => "projects",
            AliasedVocabulary::Site => "sites",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            AliasedVocabulary::Project => "project",
            AliasedVocabulary::Site => "site",
        }
    }
}

#[async_trait]
pub trait Catalog: Send {
    // Unit of work

    /// Start a unit of work (implicit on first statement)
    async fn begin(&mut self) -> ImportResult<()>;

    /// Make every statement since the last commit durable
    async fn commit(&mut self) -> ImportResult<()>;

    /// Discard every statement since the last commit
    async fn rollback(&mut self) -> ImportResult<()>;

    // Subjects and visits

    async fn find_subject_by_label(&mut self, label: &str) -> ImportResult<Option<CatalogSubject>>;

    async fn find_subject_by_cand_id(&mut self, cand_id: i64) -> ImportResult<Option<CatalogSubject>>;

    async fn insert_subject(&mut self, subject: &NewSubject) -> ImportResult<CatalogSubject>;

    async fn find_visit(
        &mut self,
        subject_id: i64,
        visit_label: &str,
    ) -> ImportResult<Option<CatalogVisit>>;

    async fn insert_visit(&mut self, visit: &NewVisit) -> ImportResult<CatalogVisit>;

    // Reference data

    async fn find_named(
        &mut self,
        vocabulary: Vocabulary,
        name: &str,
    ) -> ImportResult<Option<NamedEntity>>;

    /// Look up by name, then by alias
    ///
    /// Fails with `AmbiguousIdentifier` when several rows share the alias.
    async fn find_aliased(
        &mut self,
        vocabulary: AliasedVocabulary,
        name: &str,
    ) -> ImportResult<Option<AliasedEntity>>;

    async fn find_file_type(&mut self, name: &str) -> ImportResult<Option<String>>;

    async fn find_sex(&mut self, name: &str) -> ImportResult<Option<String>>;

    async fn hed_tags(&mut self) -> ImportResult<Vec<HedTag>>;

    // Files and parameters

    async fn find_placed_file_by_path(&mut self, path: &str) -> ImportResult<Option<PlacedFile>>;

    async fn find_placed_file(&mut self, id: i64) -> ImportResult<Option<PlacedFile>>;

    async fn insert_placed_file(&mut self, file: &NewPlacedFile) -> ImportResult<PlacedFile>;

    /// Parameter types that carry a dataset-side alias
    async fn aliased_parameter_types(&mut self) -> ImportResult<Vec<ParameterType>>;

    /// Get a parameter type, creating it in `category` if missing
    async fn ensure_parameter_type(
        &mut self,
        name: &str,
        category: &str,
    ) -> ImportResult<ParameterType>;

    /// Insert or update the value of one (owner, type) pair
    async fn upsert_parameter(
        &mut self,
        scope: ParameterScope,
        type_id: i64,
        value: Option<&str>,
    ) -> ImportResult<()>;

    async fn parameter_value(
        &mut self,
        scope: ParameterScope,
        name: &str,
    ) -> ImportResult<Option<String>>;

    // Sidecar sub-resources

    async fn insert_channel(&mut self, channel: &NewChannel) -> ImportResult<i64>;

    async fn find_channel(&mut self, file_id: i64, name: &str) -> ImportResult<Option<i64>>;

    async fn insert_event(&mut self, event: &NewEvent) -> ImportResult<i64>;

    /// Store tag group members, replacing rows at the same positions
    async fn insert_tag_group_rows(
        &mut self,
        source: TagSource,
        rows: &[TagGroupRow],
    ) -> ImportResult<()>;

    async fn insert_electrode(&mut self, electrode: &NewElectrode) -> ImportResult<i64>;
}
