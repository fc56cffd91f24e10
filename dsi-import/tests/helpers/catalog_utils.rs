//! Catalog Test Utilities
//!
//! A temporary data root with a seeded catalog inside it

use anyhow::Result;
use dsi_common::config::ImportConfig;
use dsi_import::catalog::SqliteCatalog;
use dsi_import::metadata::NoopExtractor;
use dsi_import::{ImportOptions, ImportResult, Importer, RunReport};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// HED tags known to the seeded catalog
pub const SEEDED_HED_TAGS: [&str; 5] = [
    "Sensory-event",
    "Visual-presentation",
    "Face",
    "Agent-action",
    "Press",
];

/// Data root, catalog and configuration of one test
///
/// The TempDir must be kept alive for the duration of the test.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub catalog: SqliteCatalog,
    pub config: ImportConfig,
}

impl TestEnv {
    pub fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Where a dataset named `name` is written before import
    pub fn incoming(&self, name: &str) -> PathBuf {
        self.data_dir().join("incoming").join(name)
    }

    pub fn pool(&self) -> &SqlitePool {
        self.catalog.pool()
    }

    /// Run an import with the default (no-op) metadata extractor
    pub async fn import(&mut self, options: &ImportOptions) -> ImportResult<RunReport> {
        let extractor = NoopExtractor;
        let importer = Importer::new(&self.config, self.temp_dir.path(), &extractor);
        importer.run(&mut self.catalog, options).await
    }
}

/// Create a data root with a seeded catalog
///
/// Seeds project Rye (alias RYE), site Montreal (alias MTL), cohort Control
/// and the HED tags in [`SEEDED_HED_TAGS`].
pub async fn create_test_env() -> Result<TestEnv> {
    let temp_dir = TempDir::new()?;
    let catalog = SqliteCatalog::open(&temp_dir.path().join("catalog.db")).await?;
    let pool = catalog.pool();

    sqlx::query("INSERT INTO projects (name, alias) VALUES ('Rye', 'RYE')")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO sites (name, alias) VALUES ('Montreal', 'MTL')")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO cohorts (name) VALUES ('Control')")
        .execute(pool)
        .await?;
    for tag in SEEDED_HED_TAGS {
        sqlx::query("INSERT INTO hed_tags (name) VALUES (?)")
            .bind(tag)
            .execute(pool)
            .await?;
    }

    Ok(TestEnv {
        temp_dir,
        catalog,
        config: ImportConfig::default(),
    })
}

/// Insert a subject of project Rye at site Montreal
pub async fn seed_subject(pool: &SqlitePool, cand_id: i64, label: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO subjects (cand_id, label, site_id, project_id, registered_by)
         VALUES (?, ?, (SELECT id FROM sites WHERE name = 'Montreal'),
                 (SELECT id FROM projects WHERE name = 'Rye'), 'test')",
    )
    .bind(cand_id)
    .bind(label)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn count_rows(pool: &SqlitePool, table: &str) -> Result<i64> {
    let count = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Value of a file parameter, looked up by parameter name
pub async fn parameter_value(pool: &SqlitePool, file_id: i64, name: &str) -> Result<Option<String>> {
    let value: Option<Option<String>> = sqlx::query_scalar(
        "SELECT fp.value FROM file_parameters fp
         JOIN parameter_types pt ON pt.id = fp.type_id
         WHERE fp.file_id = ? AND pt.name = ?",
    )
    .bind(file_id)
    .bind(name)
    .fetch_optional(pool)
    .await?;
    Ok(value.flatten())
}
