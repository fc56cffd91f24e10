//! Catalog database initialization
//!
//! Creates the catalog tables on first run and seeds the reference
//! vocabularies (output types, modalities, file types, channel types, status
//! types, sexes). Every statement is idempotent, so opening an existing
//! catalog is safe.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize catalog connection and create tables if needed
pub async fn init_catalog(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new catalog: {}", db_path.display());
    } else {
        info!("Opened existing catalog: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_catalog_schema(&pool).await?;
    seed_reference_vocabulary(&pool).await?;

    Ok(pool)
}

/// Create every catalog table
pub async fn create_catalog_schema(pool: &SqlitePool) -> Result<()> {
    create_reference_tables(pool).await?;
    create_subjects_table(pool).await?;
    create_visits_table(pool).await?;
    create_placed_files_table(pool).await?;
    create_parameter_tables(pool).await?;
    create_channels_table(pool).await?;
    create_events_table(pool).await?;
    create_hed_tables(pool).await?;
    create_electrodes_table(pool).await?;

    Ok(())
}

async fn create_reference_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            alias TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sites (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            alias TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cohorts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE TABLE IF NOT EXISTS sexes (name TEXT PRIMARY KEY)")
        .execute(pool)
        .await?;

    for table in ["modalities", "output_types", "channel_types", "status_types"] {
        let statement = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                description TEXT
            )",
            table
        );
        sqlx::query(&statement).execute(pool).await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS file_types (
            name TEXT PRIMARY KEY,
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_subjects_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS subjects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            cand_id INTEGER NOT NULL UNIQUE,
            label TEXT NOT NULL UNIQUE,
            date_of_birth TEXT,
            sex TEXT REFERENCES sexes(name),
            site_id INTEGER NOT NULL REFERENCES sites(id),
            project_id INTEGER NOT NULL REFERENCES projects(id),
            entity_type TEXT NOT NULL DEFAULT 'Human',
            active INTEGER NOT NULL DEFAULT 1,
            registered_by TEXT NOT NULL,
            registered_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_visits_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS visits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            subject_id INTEGER NOT NULL REFERENCES subjects(id),
            visit_label TEXT NOT NULL,
            site_id INTEGER NOT NULL REFERENCES sites(id),
            project_id INTEGER NOT NULL REFERENCES projects(id),
            cohort_id INTEGER NOT NULL REFERENCES cohorts(id),
            current_stage TEXT NOT NULL DEFAULT 'Not Started',
            scan_done INTEGER NOT NULL DEFAULT 1,
            submitted INTEGER NOT NULL DEFAULT 0,
            active INTEGER NOT NULL DEFAULT 1,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (subject_id, visit_label)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_placed_files_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS placed_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL UNIQUE,
            file_type TEXT NOT NULL REFERENCES file_types(name),
            visit_id INTEGER NOT NULL REFERENCES visits(id),
            modality_id INTEGER NOT NULL REFERENCES modalities(id),
            output_type_id INTEGER NOT NULL REFERENCES output_types(id),
            acquisition_time TEXT,
            inserted_by TEXT NOT NULL,
            inserted_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_parameter_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS parameter_types (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            alias TEXT,
            category TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS file_parameters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL REFERENCES placed_files(id),
            type_id INTEGER NOT NULL REFERENCES parameter_types(id),
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (file_id, type_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS project_parameters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            project_id INTEGER NOT NULL REFERENCES projects(id),
            type_id INTEGER NOT NULL REFERENCES parameter_types(id),
            value TEXT,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (project_id, type_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_channels_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS channels (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL REFERENCES placed_files(id),
            channel_type_id INTEGER NOT NULL REFERENCES channel_types(id),
            status_type_id INTEGER REFERENCES status_types(id),
            file_path TEXT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            sampling_frequency INTEGER,
            low_cutoff REAL,
            high_cutoff REAL,
            notch INTEGER,
            status_description TEXT,
            unit TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL REFERENCES placed_files(id),
            channel_id INTEGER REFERENCES channels(id),
            file_path TEXT NOT NULL,
            onset REAL NOT NULL,
            duration REAL NOT NULL,
            trial_type TEXT,
            response_time REAL,
            extra_columns TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_hed_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS hed_tags (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            parent_id INTEGER REFERENCES hed_tags(id),
            description TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // source_kind is 'project', 'file' or 'event'; source_id points into the
    // matching table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS event_tag_groups (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_kind TEXT NOT NULL,
            source_id INTEGER NOT NULL,
            position INTEGER NOT NULL,
            hed_tag_id INTEGER REFERENCES hed_tags(id),
            tag_value TEXT,
            has_pairing INTEGER NOT NULL,
            additional_members INTEGER NOT NULL,
            property_name TEXT,
            property_value TEXT,
            description TEXT,
            UNIQUE (source_kind, source_id, position)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_electrodes_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS electrodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_id INTEGER NOT NULL REFERENCES placed_files(id),
            name TEXT NOT NULL,
            x REAL NOT NULL,
            y REAL NOT NULL,
            z REAL NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Seed the reference vocabularies the importer resolves names against
///
/// Projects, sites, cohorts and HED tags are site-specific and are not seeded.
pub async fn seed_reference_vocabulary(pool: &SqlitePool) -> Result<()> {
    for name in ["raw", "derivative"] {
        ensure_named_row(pool, "output_types", name).await?;
    }

    for name in ["anat", "dwi", "fmap", "func", "eeg", "ieeg", "meg"] {
        ensure_named_row(pool, "modalities", name).await?;
    }

    for name in [
        "MEGMAG", "MEGGRADAXIAL", "MEGGRADPLANAR", "MEGREFMAG", "MEGREFGRADAXIAL",
        "MEGREFGRADPLANAR", "MEGOTHER", "EEG", "ECOG", "SEEG", "DBS", "VEOG", "HEOG", "EOG",
        "ECG", "EMG", "TRIG", "AUDIO", "PD", "EYEGAZE", "PUPIL", "MISC", "SYSCLOCK", "ADC",
        "DAC", "HLU", "FITERR", "OTHER",
    ] {
        ensure_named_row(pool, "channel_types", name).await?;
    }

    for name in ["good", "bad"] {
        ensure_named_row(pool, "status_types", name).await?;
    }

    for name in [
        "nii", "ctf", "edf", "set", "vhdr", "bdf", "bval", "bvec", "json", "tsv",
    ] {
        sqlx::query("INSERT OR IGNORE INTO file_types (name) VALUES (?)")
            .bind(name)
            .execute(pool)
            .await?;
    }

    for name in ["Male", "Female", "Other"] {
        sqlx::query("INSERT OR IGNORE INTO sexes (name) VALUES (?)")
            .bind(name)
            .execute(pool)
            .await?;
    }

    Ok(())
}

async fn ensure_named_row(pool: &SqlitePool, table: &str, name: &str) -> Result<()> {
    let statement = format!("INSERT OR IGNORE INTO {} (name) VALUES (?)", table);
    sqlx::query(&statement).bind(name).execute(pool).await?;
    Ok(())
}
