//! End-to-end import tests against a temporary catalog

mod helpers;

use dsi_import::dataset::participants::ParticipantRecord;
use dsi_import::dataset::SubjectInfo;
use dsi_import::orchestrator::validate_identifiers;
use dsi_import::resolve::{resolve_or_create_subject, CAND_ID_RANGE};
use dsi_import::{ImportError, ImportOptions};
use helpers::*;
use indexmap::IndexMap;
use std::path::Path;

const MEG_PATH: &str =
    "bids_imports/Rye_MEG_BIDSVersion_1.8.0/sub-Rye01/ses-V1/meg/sub-Rye01_ses-V1_task-rest_meg.ds.tar.gz";

const MANAGED_ROOT: &str = "bids_imports/Rye_MEG_BIDSVersion_1.8.0";

fn creating_options(root: &Path) -> ImportOptions {
    let mut options = ImportOptions::new(root);
    options.create_subject = true;
    options.create_visit = true;
    options
}

async fn tag_rows_of_kind(pool: &sqlx::SqlitePool, kind: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM event_tag_groups WHERE source_kind = ?")
        .bind(kind)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn file_id(pool: &sqlx::SqlitePool, path: &str) -> i64 {
    sqlx::query_scalar("SELECT id FROM placed_files WHERE path = ?")
        .bind(path)
        .fetch_one(pool)
        .await
        .unwrap()
}

fn meg_dataset(env: &TestEnv) -> DatasetBuilder {
    let dataset = DatasetBuilder::new(&env.incoming("rye_meg"), "Rye MEG").unwrap();
    dataset
        .participants(&["sub-Rye01\tM\tMontreal\tRye\tControl"])
        .unwrap();
    dataset.meg("Rye01", Some("V1")).unwrap();
    dataset
}

#[tokio::test]
async fn test_meg_import_catalogues_recording_and_sidecars() {
    let mut env = create_test_env().await.unwrap();
    let dataset = meg_dataset(&env);
    dataset.root_events().unwrap();

    let report = env.import(&creating_options(&dataset.root)).await.unwrap();
    assert_eq!(report.imported, 1, "{}", report.summary());
    assert!(!report.has_failures(), "{}", report.summary());

    let pool = env.pool();
    assert_eq!(count_rows(pool, "subjects").await.unwrap(), 1);
    assert_eq!(count_rows(pool, "visits").await.unwrap(), 1);
    assert_eq!(count_rows(pool, "placed_files").await.unwrap(), 1);

    let cand_id: i64 = sqlx::query_scalar("SELECT cand_id FROM subjects WHERE label = 'Rye01'")
        .fetch_one(pool)
        .await
        .unwrap();
    assert!(CAND_ID_RANGE.contains(&cand_id));

    let sex: Option<String> = sqlx::query_scalar("SELECT sex FROM subjects WHERE label = 'Rye01'")
        .fetch_one(pool)
        .await
        .unwrap();
    assert_eq!(sex.as_deref(), Some("Male"));

    // Archived under the managed root, sidecars next to the recording
    let copied = env.data_dir().join(MEG_PATH);
    assert!(copied.is_file());
    let meg_dir = copied.parent().unwrap();
    assert!(meg_dir.join("sub-Rye01_ses-V1_task-rest_meg.json").is_file());
    assert!(meg_dir.join("sub-Rye01_ses-V1_task-rest_channels.tsv").is_file());
    assert!(meg_dir.join("sub-Rye01_ses-V1_task-rest_events.tsv").is_file());

    // Visit and dataset level files follow
    let managed = env.data_dir().join(MANAGED_ROOT);
    assert!(managed.join("sub-Rye01/ses-V1/sub-Rye01_ses-V1_scans.tsv").is_file());
    assert!(managed.join("events.json").is_file());

    let id = file_id(pool, MEG_PATH).await;
    let acquisition_time: Option<String> =
        sqlx::query_scalar("SELECT acquisition_time FROM placed_files WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap();
    assert_eq!(acquisition_time.as_deref(), Some("2024-03-01 10:00:00"));

    assert_eq!(
        parameter_value(pool, id, "TaskName").await.unwrap().as_deref(),
        Some("rest")
    );
    assert_eq!(
        parameter_value(pool, id, "SamplingFrequency").await.unwrap().as_deref(),
        Some("1200")
    );
    let hash = parameter_value(pool, id, "file_sha256_hash").await.unwrap().unwrap();
    assert_eq!(hash.len(), 64);

    assert_eq!(count_rows(pool, "channels").await.unwrap(), 2);
    assert_eq!(count_rows(pool, "events").await.unwrap(), 2);

    // The first event names the trigger channel, which was ingested before it
    let linked: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM events e JOIN channels c ON c.id = e.channel_id
         WHERE c.name = 'UPPT001'",
    )
    .fetch_one(pool)
    .await
    .unwrap();
    assert_eq!(linked, 1);

    let extra: Option<String> =
        sqlx::query_scalar("SELECT extra_columns FROM events WHERE trial_type = 'go'")
            .fetch_one(pool)
            .await
            .unwrap();
    assert_eq!(extra.as_deref(), Some(r#"{"stim_file":"face1.png"}"#));

    // Sensory-event,(Visual-presentation,Face)
    assert_eq!(tag_rows_of_kind(pool, "event").await, 3);
    // Agent-action,(Press) and Sensory-event
    assert_eq!(tag_rows_of_kind(pool, "file").await, 3);
    // Dataset-level events.json
    assert_eq!(tag_rows_of_kind(pool, "project").await, 1);
}

#[tokio::test]
async fn test_second_run_skips_imported_files() {
    let mut env = create_test_env().await.unwrap();
    let dataset = meg_dataset(&env);
    let options = creating_options(&dataset.root);

    let first = env.import(&options).await.unwrap();
    assert_eq!(first.imported, 1, "{}", first.summary());
    let events = count_rows(env.pool(), "events").await.unwrap();
    let parameters = count_rows(env.pool(), "file_parameters").await.unwrap();

    let second = env.import(&options).await.unwrap();
    assert_eq!(second.imported, 0);
    assert_eq!(second.ignored, 1);
    assert!(!second.has_failures(), "{}", second.summary());

    let pool = env.pool();
    assert_eq!(count_rows(pool, "subjects").await.unwrap(), 1);
    assert_eq!(count_rows(pool, "visits").await.unwrap(), 1);
    assert_eq!(count_rows(pool, "placed_files").await.unwrap(), 1);
    assert_eq!(count_rows(pool, "events").await.unwrap(), events);
    assert_eq!(count_rows(pool, "file_parameters").await.unwrap(), parameters);
}

#[tokio::test]
async fn test_failed_placement_is_undone_and_retried() {
    let mut env = create_test_env().await.unwrap();
    let dataset = meg_dataset(&env);
    let options = creating_options(&dataset.root);

    // Something already sits where the recording archive goes
    let blocker = env.data_dir().join(MEG_PATH);
    std::fs::create_dir_all(&blocker).unwrap();

    let report = env.import(&options).await.unwrap();
    assert_eq!(report.imported, 0);
    assert_eq!(report.failures.len(), 1, "{}", report.summary());
    assert!(report.failures[0].message.contains("Already exists"));

    let meg_dir = blocker.parent().unwrap().to_path_buf();
    assert!(!meg_dir.join("sub-Rye01_ses-V1_task-rest_meg.json").exists());
    assert!(!meg_dir.join("sub-Rye01_ses-V1_task-rest_channels.tsv").exists());
    assert_eq!(count_rows(env.pool(), "placed_files").await.unwrap(), 0);

    std::fs::remove_dir_all(&blocker).unwrap();
    let retry = env.import(&options).await.unwrap();
    assert_eq!(retry.imported, 1, "{}", retry.summary());
    assert!(!retry.has_failures(), "{}", retry.summary());
    assert!(blocker.is_file());
}

#[tokio::test]
async fn test_scans_file_is_merged_into_the_managed_visit() {
    let mut env = create_test_env().await.unwrap();
    let dataset = meg_dataset(&env);
    let options = creating_options(&dataset.root);
    env.import(&options).await.unwrap();

    // A later delivery of the same visit lists one more file
    let scans = dataset.root.join("sub-Rye01/ses-V1/sub-Rye01_ses-V1_scans.tsv");
    write_file(
        &scans,
        "filename\tacq_time\n\
         meg/sub-Rye01_ses-V1_task-rest_meg.ds\t2024-03-01T10:00:00\n\
         meg/sub-Rye01_ses-V1_task-noise_meg.ds\t2024-03-01T11:00:00\n",
    )
    .unwrap();
    env.import(&options).await.unwrap();

    let merged = std::fs::read_to_string(
        env.data_dir()
            .join(MANAGED_ROOT)
            .join("sub-Rye01/ses-V1/sub-Rye01_ses-V1_scans.tsv"),
    )
    .unwrap();
    let listed: Vec<&str> = merged.lines().skip(1).collect();
    assert_eq!(listed.len(), 2, "{}", merged);
    assert!(listed[0].starts_with("meg/sub-Rye01_ses-V1_task-rest_meg.ds"));
    assert!(listed[1].starts_with("meg/sub-Rye01_ses-V1_task-noise_meg.ds"));
}

#[tokio::test]
async fn test_no_copy_references_files_in_place() {
    let mut env = create_test_env().await.unwrap();
    let dataset = meg_dataset(&env);
    let mut options = creating_options(&dataset.root);
    options.copy_files = false;

    let report = env.import(&options).await.unwrap();
    assert_eq!(report.imported, 1, "{}", report.summary());

    let path: String = sqlx::query_scalar("SELECT path FROM placed_files")
        .fetch_one(env.pool())
        .await
        .unwrap();
    assert_eq!(
        path,
        "incoming/rye_meg/sub-Rye01/ses-V1/meg/sub-Rye01_ses-V1_task-rest_meg.ds"
    );
    assert!(env.data_dir().join(&path).is_dir());
    assert!(!env.data_dir().join("bids_imports").exists());
}

#[tokio::test]
async fn test_no_copy_outside_data_root_is_fatal() {
    let mut env = create_test_env().await.unwrap();
    let elsewhere = tempfile::TempDir::new().unwrap();
    let dataset = DatasetBuilder::new(&elsewhere.path().join("rye_meg"), "Rye MEG").unwrap();
    dataset.meg("Rye01", Some("V1")).unwrap();

    let mut options = creating_options(&dataset.root);
    options.copy_files = false;

    let result = env.import(&options).await;
    assert!(matches!(result, Err(ImportError::UnreadableDataset(_))));
}

#[tokio::test]
async fn test_subject_batch_keeps_valid_subjects() {
    let mut env = create_test_env().await.unwrap();
    let dataset = DatasetBuilder::new(&env.incoming("rye_anat"), "Rye Anat").unwrap();

    let rows: Vec<String> = (1..=5)
        .map(|i| {
            let site = if i == 3 { "Nowhere" } else { "MTL" };
            format!("sub-Rye0{}\tF\t{}\tRYE\tControl", i, site)
        })
        .collect();
    let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
    dataset.participants(&rows).unwrap();
    for i in 1..=5 {
        dataset.anat(&format!("Rye0{}", i), Some("V1")).unwrap();
    }

    let report = env.import(&creating_options(&dataset.root)).await.unwrap();

    let pool = env.pool();
    assert_eq!(count_rows(pool, "subjects").await.unwrap(), 4);
    assert_eq!(count_rows(pool, "visits").await.unwrap(), 4);
    assert_eq!(count_rows(pool, "placed_files").await.unwrap(), 4);
    assert_eq!(report.imported, 4);

    assert_eq!(report.failures.len(), 1, "{}", report.summary());
    let failure = &report.failures[0].message;
    assert!(failure.contains("subject 'Rye03'"), "{}", failure);
    assert!(failure.contains("site 'Nowhere'"), "{}", failure);

    let missing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subjects WHERE label = 'Rye03'")
        .fetch_one(pool)
        .await
        .unwrap();
    assert_eq!(missing, 0);
}

#[tokio::test]
async fn test_mri_parameters_include_suffix_and_hash() {
    let mut env = create_test_env().await.unwrap();
    let dataset = DatasetBuilder::new(&env.incoming("rye_anat"), "Rye Anat").unwrap();
    dataset
        .participants(&["sub-Rye01\tF\tMTL\tRYE\tControl"])
        .unwrap();
    dataset.anat("Rye01", Some("V1")).unwrap();

    let report = env.import(&creating_options(&dataset.root)).await.unwrap();
    assert_eq!(report.imported, 1, "{}", report.summary());

    let pool = env.pool();
    let id = file_id(
        pool,
        "bids_imports/Rye_Anat_BIDSVersion_1.8.0/sub-Rye01/ses-V1/anat/sub-Rye01_ses-V1_T1w.nii.gz",
    )
    .await;
    assert_eq!(
        parameter_value(pool, id, "acquisition_suffix").await.unwrap().as_deref(),
        Some("T1w")
    );
    assert_eq!(
        parameter_value(pool, id, "MagneticFieldStrength").await.unwrap().as_deref(),
        Some("3")
    );
    assert!(parameter_value(pool, id, "file_sha256_hash").await.unwrap().is_some());

    let category: String =
        sqlx::query_scalar("SELECT category FROM parameter_types WHERE name = 'RepetitionTime'")
            .fetch_one(pool)
            .await
            .unwrap();
    assert_eq!(category, "MRI Variables");
}

#[tokio::test]
async fn test_subject_creation_reports_every_missing_field() {
    let mut env = create_test_env().await.unwrap();
    let info = SubjectInfo {
        label: "Rye09".to_string(),
        participant: Some(ParticipantRecord {
            participant_id: "Rye09".to_string(),
            date_of_birth: None,
            sex: Some("X".to_string()),
            site: None,
            project: Some("Rye".to_string()),
            cohort: Some("Control".to_string()),
            fields: IndexMap::new(),
        }),
    };

    let error = resolve_or_create_subject(&mut env.catalog, &info, true, "test")
        .await
        .unwrap_err();

    let leaves = error.leaves();
    assert_eq!(leaves.len(), 2, "{}", error);
    assert!(leaves
        .iter()
        .any(|e| matches!(e, ImportError::MissingRequiredField { field, .. } if field == "site")));
    assert!(leaves
        .iter()
        .any(|e| matches!(e, ImportError::NotFound(what) if what.contains("sex"))));
}

#[tokio::test]
async fn test_numeric_label_is_never_created() {
    let mut env = create_test_env().await.unwrap();
    let info = SubjectInfo {
        label: "123456".to_string(),
        participant: None,
    };

    let result = resolve_or_create_subject(&mut env.catalog, &info, true, "test").await;
    assert!(matches!(result, Err(ImportError::NotFound(_))));
    assert_eq!(count_rows(env.pool(), "subjects").await.unwrap(), 0);

    seed_subject(env.pool(), 123456, "Rye07").await.unwrap();
    let found = resolve_or_create_subject(&mut env.catalog, &info, true, "test")
        .await
        .unwrap();
    assert_eq!(found.label, "Rye07");
}

#[tokio::test]
async fn test_participant_mismatch_is_fatal() {
    let mut env = create_test_env().await.unwrap();
    let dataset = DatasetBuilder::new(&env.incoming("rye_anat"), "Rye Anat").unwrap();
    dataset
        .participants(&[
            "sub-Rye01\tF\tMTL\tRYE\tControl",
            "sub-Rye02\tF\tMTL\tRYE\tControl",
        ])
        .unwrap();
    dataset.anat("Rye01", Some("V1")).unwrap();

    let result = env.import(&creating_options(&dataset.root)).await;
    assert!(matches!(result, Err(ImportError::ParticipantMismatch(_))));
    assert_eq!(count_rows(env.pool(), "subjects").await.unwrap(), 0);
}

#[tokio::test]
async fn test_missing_visit_without_creation_is_reported() {
    let mut env = create_test_env().await.unwrap();
    let dataset = DatasetBuilder::new(&env.incoming("rye_anat"), "Rye Anat").unwrap();
    dataset
        .participants(&["sub-Rye01\tF\tMTL\tRYE\tControl"])
        .unwrap();
    dataset.anat("Rye01", Some("V1")).unwrap();

    let mut options = creating_options(&dataset.root);
    options.create_visit = false;

    let report = env.import(&options).await.unwrap();
    assert_eq!(report.imported, 0);
    assert_eq!(report.failures.len(), 1, "{}", report.summary());
    assert!(report.failures[0].message.starts_with("visits"));
    // The subject itself was created and committed
    assert_eq!(count_rows(env.pool(), "subjects").await.unwrap(), 1);
    assert_eq!(count_rows(env.pool(), "placed_files").await.unwrap(), 0);
}

#[tokio::test]
async fn test_identifier_validation() {
    let mut env = create_test_env().await.unwrap();
    seed_subject(env.pool(), 424242, "Rye01").await.unwrap();

    validate_identifiers(&mut env.catalog, Path::new("/data/Rye01_424242"))
        .await
        .unwrap();

    let mismatch = validate_identifiers(&mut env.catalog, Path::new("/data/Rye02_424242")).await;
    assert!(matches!(mismatch, Err(ImportError::IdentifierMismatch(_))));

    let unnamed = validate_identifiers(&mut env.catalog, Path::new("/data/Rye01")).await;
    assert!(matches!(unnamed, Err(ImportError::IdentifierMismatch(_))));

    let unknown = validate_identifiers(&mut env.catalog, Path::new("/data/Rye01_111111")).await;
    assert!(matches!(unknown, Err(ImportError::NotFound(_))));
}

#[tokio::test]
async fn test_channel_vocabulary_is_matched_exactly() {
    let mut env = create_test_env().await.unwrap();
    let dataset = meg_dataset(&env);
    write_file(
        &dataset
            .root
            .join("sub-Rye01/ses-V1/meg/sub-Rye01_ses-V1_task-rest_channels.tsv"),
        "name\ttype\tunits\tstatus\n\
         MLC11\tmeggradaxial\tT\tgood\n\
         UPPT001\tTRIG\tV\tGOOD\n",
    )
    .unwrap();

    let report = env.import(&creating_options(&dataset.root)).await.unwrap();
    assert_eq!(report.imported, 0);
    assert_eq!(report.failures.len(), 1, "{}", report.summary());
    assert!(report.unknown_channel_types.contains("meggradaxial"));
    assert!(report.unknown_status_types.contains("GOOD"));
    assert_eq!(count_rows(env.pool(), "channels").await.unwrap(), 0);
}

#[tokio::test]
async fn test_unknown_hed_tag_fails_only_its_acquisition() {
    let mut env = create_test_env().await.unwrap();
    let dataset = meg_dataset(&env);
    let events = dataset
        .root
        .join("sub-Rye01/ses-V1/meg/sub-Rye01_ses-V1_task-rest_events.tsv");
    write_file(
        &events,
        "onset\tduration\tHED\n1.0\t0.5\tSensory-event,(Unknown-tag)\n",
    )
    .unwrap();

    let report = env.import(&creating_options(&dataset.root)).await.unwrap();
    assert_eq!(report.imported, 0);
    assert_eq!(report.failures.len(), 1, "{}", report.summary());
    assert!(report.failures[0].message.contains("Unknown-tag"));

    // Nothing of the failed acquisition survives the rollback
    let pool = env.pool();
    assert_eq!(count_rows(pool, "placed_files").await.unwrap(), 0);
    assert_eq!(count_rows(pool, "channels").await.unwrap(), 0);
    assert_eq!(count_rows(pool, "events").await.unwrap(), 0);
    assert!(!env.data_dir().join(MEG_PATH).exists());
}
