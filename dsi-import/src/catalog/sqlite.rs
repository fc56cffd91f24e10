//! SQLite catalog
//!
//! Holds at most one open transaction. The first statement after a commit
//! opens a new one, so every call between two commits is one unit of work.

use super::{AliasedVocabulary, Catalog, Vocabulary};
use crate::error::{ImportError, ImportResult};
use async_trait::async_trait;
use dsi_common::db::{
    AliasedEntity, CatalogSubject, CatalogVisit, HedTag, NamedEntity, NewChannel, NewElectrode,
    NewEvent, NewPlacedFile, NewSubject, NewVisit, ParameterScope, ParameterType, PlacedFile,
    TagGroupRow, TagSource,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::path::Path;
use tracing::debug;

const SUBJECT_COLUMNS: &str =
    "id, cand_id, label, date_of_birth, sex, site_id, project_id";
const VISIT_COLUMNS: &str = "id, subject_id, visit_label, site_id, project_id, cohort_id";
const FILE_COLUMNS: &str =
    "id, path, file_type, visit_id, modality_id, output_type_id, acquisition_time";

pub struct SqliteCatalog {
    pool: SqlitePool,
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, tx: None }
    }

    /// Open (creating if needed) the catalog database at `db_path`
    pub async fn open(db_path: &Path) -> ImportResult<Self> {
        Ok(Self::new(dsi_common::db::init_catalog(db_path).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn tx(&mut self) -> ImportResult<&mut Transaction<'static, Sqlite>> {
        let tx = match self.tx.take() {
            Some(tx) => tx,
            None => self.pool.begin().await?,
        };
        Ok(self.tx.insert(tx))
    }
}

fn subject_from_row(row: &SqliteRow) -> CatalogSubject {
    CatalogSubject {
        id: row.get("id"),
        cand_id: row.get("cand_id"),
        label: row.get("label"),
        date_of_birth: row.get("date_of_birth"),
        sex: row.get("sex"),
        site_id: row.get("site_id"),
        project_id: row.get("project_id"),
    }
}

fn visit_from_row(row: &SqliteRow) -> CatalogVisit {
    CatalogVisit {
        id: row.get("id"),
        subject_id: row.get("subject_id"),
        visit_label: row.get("visit_label"),
        site_id: row.get("site_id"),
        project_id: row.get("project_id"),
        cohort_id: row.get("cohort_id"),
    }
}

fn file_from_row(row: &SqliteRow) -> PlacedFile {
    PlacedFile {
        id: row.get("id"),
        path: row.get("path"),
        file_type: row.get("file_type"),
        visit_id: row.get("visit_id"),
        modality_id: row.get("modality_id"),
        output_type_id: row.get("output_type_id"),
        acquisition_time: row.get("acquisition_time"),
    }
}

fn parameter_type_from_row(row: &SqliteRow) -> ParameterType {
    ParameterType {
        id: row.get("id"),
        name: row.get("name"),
        alias: row.get("alias"),
        category: row.get("category"),
    }
}

fn aliased_from_row(row: &SqliteRow) -> AliasedEntity {
    AliasedEntity {
        id: row.get("id"),
        name: row.get("name"),
        alias: row.get("alias"),
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn begin(&mut self) -> ImportResult<()> {
        self.tx().await?;
        Ok(())
    }

    async fn commit(&mut self) -> ImportResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
            debug!("Catalog transaction committed");
        }
        Ok(())
    }

    async fn rollback(&mut self) -> ImportResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
            debug!("Catalog transaction rolled back");
        }
        Ok(())
    }

    async fn find_subject_by_label(&mut self, label: &str) -> ImportResult<Option<CatalogSubject>> {
        let tx = self.tx().await?;
        let query = format!("SELECT {} FROM subjects WHERE label = ?", SUBJECT_COLUMNS);
        let row = sqlx::query(&query)
            .bind(label)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.as_ref().map(subject_from_row))
    }

    async fn find_subject_by_cand_id(&mut self, cand_id: i64) -> ImportResult<Option<CatalogSubject>> {
        let tx = self.tx().await?;
        let query = format!("SELECT {} FROM subjects WHERE cand_id = ?", SUBJECT_COLUMNS);
        let row = sqlx::query(&query)
            .bind(cand_id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.as_ref().map(subject_from_row))
    }

    async fn insert_subject(&mut self, subject: &NewSubject) -> ImportResult<CatalogSubject> {
        let tx = self.tx().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO subjects
                (cand_id, label, date_of_birth, sex, site_id, project_id, registered_by)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(subject.cand_id)
        .bind(&subject.label)
        .bind(&subject.date_of_birth)
        .bind(&subject.sex)
        .bind(subject.site_id)
        .bind(subject.project_id)
        .bind(&subject.registered_by)
        .execute(&mut **tx)
        .await?;

        Ok(CatalogSubject {
            id: result.last_insert_rowid(),
            cand_id: subject.cand_id,
            label: subject.label.clone(),
            date_of_birth: subject.date_of_birth.clone(),
            sex: subject.sex.clone(),
            site_id: subject.site_id,
            project_id: subject.project_id,
        })
    }

    async fn find_visit(
        &mut self,
        subject_id: i64,
        visit_label: &str,
    ) -> ImportResult<Option<CatalogVisit>> {
        let tx = self.tx().await?;
        let query = format!(
            "SELECT {} FROM visits WHERE subject_id = ? AND visit_label = ?",
            VISIT_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(subject_id)
            .bind(visit_label)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.as_ref().map(visit_from_row))
    }

    async fn insert_visit(&mut self, visit: &NewVisit) -> ImportResult<CatalogVisit> {
        let tx = self.tx().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO visits
                (subject_id, visit_label, site_id, project_id, cohort_id,
                 current_stage, scan_done, submitted, active)
            VALUES (?, ?, ?, ?, ?, 'Not Started', 1, 0, 1)
            "#,
        )
        .bind(visit.subject_id)
        .bind(&visit.visit_label)
        .bind(visit.site_id)
        .bind(visit.project_id)
        .bind(visit.cohort_id)
        .execute(&mut **tx)
        .await?;

        Ok(CatalogVisit {
            id: result.last_insert_rowid(),
            subject_id: visit.subject_id,
            visit_label: visit.visit_label.clone(),
            site_id: visit.site_id,
            project_id: visit.project_id,
            cohort_id: visit.cohort_id,
        })
    }

    async fn find_named(
        &mut self,
        vocabulary: Vocabulary,
        name: &str,
    ) -> ImportResult<Option<NamedEntity>> {
        let tx = self.tx().await?;
        let query = format!("SELECT id, name FROM {} WHERE name = ?", vocabulary.table());
        let row = sqlx::query(&query)
            .bind(name)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.map(|row| NamedEntity {
            id: row.get("id"),
            name: row.get("name"),
        }))
    }

    async fn find_aliased(
        &mut self,
        vocabulary: AliasedVocabulary,
        name: &str,
    ) -> ImportResult<Option<AliasedEntity>> {
        let tx = self.tx().await?;

        let by_name = format!("SELECT id, name, alias FROM {} WHERE name = ?", vocabulary.table());
        if let Some(row) = sqlx::query(&by_name)
            .bind(name)
            .fetch_optional(&mut **tx)
            .await?
        {
            return Ok(Some(aliased_from_row(&row)));
        }

        let by_alias = format!("SELECT id, name, alias FROM {} WHERE alias = ?", vocabulary.table());
        let rows = sqlx::query(&by_alias)
            .bind(name)
            .fetch_all(&mut **tx)
            .await?;

        match rows.as_slice() {
            [] => Ok(None),
            [row] => Ok(Some(aliased_from_row(row))),
            _ => Err(ImportError::AmbiguousIdentifier(format!(
                "{} alias '{}' matches {} rows",
                vocabulary.label(),
                name,
                rows.len()
            ))),
        }
    }

    async fn find_file_type(&mut self, name: &str) -> ImportResult<Option<String>> {
        let tx = self.tx().await?;
        let name = sqlx::query_scalar("SELECT name FROM file_types WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(name)
    }

    async fn find_sex(&mut self, name: &str) -> ImportResult<Option<String>> {
        let tx = self.tx().await?;
        let name = sqlx::query_scalar("SELECT name FROM sexes WHERE name = ?")
            .bind(name)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(name)
    }

    async fn hed_tags(&mut self) -> ImportResult<Vec<HedTag>> {
        let tx = self.tx().await?;
        let rows = sqlx::query("SELECT id, name, parent_id FROM hed_tags ORDER BY id")
            .fetch_all(&mut **tx)
            .await?;
        Ok(rows
            .iter()
            .map(|row| HedTag {
                id: row.get("id"),
                name: row.get("name"),
                parent_id: row.get("parent_id"),
            })
            .collect())
    }

    async fn find_placed_file_by_path(&mut self, path: &str) -> ImportResult<Option<PlacedFile>> {
        let tx = self.tx().await?;
        let query = format!("SELECT {} FROM placed_files WHERE path = ?", FILE_COLUMNS);
        let row = sqlx::query(&query)
            .bind(path)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.as_ref().map(file_from_row))
    }

    async fn find_placed_file(&mut self, id: i64) -> ImportResult<Option<PlacedFile>> {
        let tx = self.tx().await?;
        let query = format!("SELECT {} FROM placed_files WHERE id = ?", FILE_COLUMNS);
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.as_ref().map(file_from_row))
    }

    async fn insert_placed_file(&mut self, file: &NewPlacedFile) -> ImportResult<PlacedFile> {
        let tx = self.tx().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO placed_files
                (path, file_type, visit_id, modality_id, output_type_id, acquisition_time, inserted_by)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file.path)
        .bind(&file.file_type)
        .bind(file.visit_id)
        .bind(file.modality_id)
        .bind(file.output_type_id)
        .bind(&file.acquisition_time)
        .bind(&file.inserted_by)
        .execute(&mut **tx)
        .await?;

        Ok(PlacedFile {
            id: result.last_insert_rowid(),
            path: file.path.clone(),
            file_type: file.file_type.clone(),
            visit_id: file.visit_id,
            modality_id: file.modality_id,
            output_type_id: file.output_type_id,
            acquisition_time: file.acquisition_time.clone(),
        })
    }

    async fn aliased_parameter_types(&mut self) -> ImportResult<Vec<ParameterType>> {
        let tx = self.tx().await?;
        let rows = sqlx::query(
            "SELECT id, name, alias, category FROM parameter_types WHERE alias IS NOT NULL",
        )
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows.iter().map(parameter_type_from_row).collect())
    }

    async fn ensure_parameter_type(
        &mut self,
        name: &str,
        category: &str,
    ) -> ImportResult<ParameterType> {
        let tx = self.tx().await?;
        sqlx::query("INSERT OR IGNORE INTO parameter_types (name, category) VALUES (?, ?)")
            .bind(name)
            .bind(category)
            .execute(&mut **tx)
            .await?;

        let row = sqlx::query("SELECT id, name, alias, category FROM parameter_types WHERE name = ?")
            .bind(name)
            .fetch_one(&mut **tx)
            .await?;
        Ok(parameter_type_from_row(&row))
    }

    async fn upsert_parameter(
        &mut self,
        scope: ParameterScope,
        type_id: i64,
        value: Option<&str>,
    ) -> ImportResult<()> {
        let (statement, owner_id) = match scope {
            ParameterScope::File(id) => (
                r#"
                INSERT INTO file_parameters (file_id, type_id, value) VALUES (?, ?, ?)
                ON CONFLICT(file_id, type_id) DO UPDATE SET
                    value = excluded.value,
                    updated_at = CURRENT_TIMESTAMP
                "#,
                id,
            ),
            ParameterScope::Project(id) => (
                r#"
                INSERT INTO project_parameters (project_id, type_id, value) VALUES (?, ?, ?)
                ON CONFLICT(project_id, type_id) DO UPDATE SET
                    value = excluded.value,
                    updated_at = CURRENT_TIMESTAMP
                "#,
                id,
            ),
        };

        let tx = self.tx().await?;
        sqlx::query(statement)
            .bind(owner_id)
            .bind(type_id)
            .bind(value)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn parameter_value(
        &mut self,
        scope: ParameterScope,
        name: &str,
    ) -> ImportResult<Option<String>> {
        let (statement, owner_id) = match scope {
            ParameterScope::File(id) => (
                r#"
                SELECT p.value FROM file_parameters p
                JOIN parameter_types t ON t.id = p.type_id
                WHERE p.file_id = ? AND t.name = ?
                "#,
                id,
            ),
            ParameterScope::Project(id) => (
                r#"
                SELECT p.value FROM project_parameters p
                JOIN parameter_types t ON t.id = p.type_id
                WHERE p.project_id = ? AND t.name = ?
                "#,
                id,
            ),
        };

        let tx = self.tx().await?;
        let value: Option<Option<String>> = sqlx::query_scalar(statement)
            .bind(owner_id)
            .bind(name)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(value.flatten())
    }

    async fn insert_channel(&mut self, channel: &NewChannel) -> ImportResult<i64> {
        let tx = self.tx().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO channels
                (file_id, channel_type_id, status_type_id, file_path, name, description,
                 sampling_frequency, low_cutoff, high_cutoff, notch, status_description, unit)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(channel.file_id)
        .bind(channel.channel_type_id)
        .bind(channel.status_type_id)
        .bind(&channel.file_path)
        .bind(&channel.name)
        .bind(&channel.description)
        .bind(channel.sampling_frequency)
        .bind(channel.low_cutoff)
        .bind(channel.high_cutoff)
        .bind(channel.notch)
        .bind(&channel.status_description)
        .bind(&channel.unit)
        .execute(&mut **tx)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn find_channel(&mut self, file_id: i64, name: &str) -> ImportResult<Option<i64>> {
        let tx = self.tx().await?;
        let id = sqlx::query_scalar("SELECT id FROM channels WHERE file_id = ? AND name = ?")
            .bind(file_id)
            .bind(name)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(id)
    }

    async fn insert_event(&mut self, event: &NewEvent) -> ImportResult<i64> {
        let tx = self.tx().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO events
                (file_id, channel_id, file_path, onset, duration, trial_type, response_time, extra_columns)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.file_id)
        .bind(event.channel_id)
        .bind(&event.file_path)
        .bind(event.onset)
        .bind(event.duration)
        .bind(&event.trial_type)
        .bind(event.response_time)
        .bind(&event.extra_columns)
        .execute(&mut **tx)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn insert_tag_group_rows(
        &mut self,
        source: TagSource,
        rows: &[TagGroupRow],
    ) -> ImportResult<()> {
        let tx = self.tx().await?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO event_tag_groups
                    (source_kind, source_id, position, hed_tag_id, tag_value, has_pairing,
                     additional_members, property_name, property_value, description)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(source_kind, source_id, position) DO UPDATE SET
                    hed_tag_id = excluded.hed_tag_id,
                    tag_value = excluded.tag_value,
                    has_pairing = excluded.has_pairing,
                    additional_members = excluded.additional_members,
                    property_name = excluded.property_name,
                    property_value = excluded.property_value,
                    description = excluded.description
                "#,
            )
            .bind(source.kind())
            .bind(source.id())
            .bind(row.position)
            .bind(row.hed_tag_id)
            .bind(&row.tag_value)
            .bind(row.has_pairing)
            .bind(row.additional_members)
            .bind(&row.property_name)
            .bind(&row.property_value)
            .bind(&row.description)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn insert_electrode(&mut self, electrode: &NewElectrode) -> ImportResult<i64> {
        let tx = self.tx().await?;
        let result = sqlx::query(
            "INSERT INTO electrodes (file_id, name, x, y, z) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(electrode.file_id)
        .bind(&electrode.name)
        .bind(electrode.x)
        .bind(electrode.y)
        .bind(electrode.z)
        .execute(&mut **tx)
        .await?;
        Ok(result.last_insert_rowid())
    }
}
