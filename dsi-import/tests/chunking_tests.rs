//! Chunking tests with stand-in chunking executables
//!
//! The executables are shell scripts written into the test data root.

#![cfg(unix)]

mod helpers;

use dsi_import::catalog::{Catalog, SqliteCatalog};
use dsi_import::chunking::{ChunkOutcome, ChunkingInvoker, CHUNK_PATH_PARAMETER};
use dsi_import::{ImportError, ImportOptions};
use helpers::*;
use serial_test::serial;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const CHUNKS_PATH: &str = "bids_imports/Rye_MEG_BIDSVersion_1.8.0_chunks/sub-Rye01_ses-V1_task-rest_meg.chunks";

/// Script that records each call in `calls.log` and creates `<dest>/<stem>.chunks`
fn chunking_script(dir: &Path) -> PathBuf {
    let log = dir.join("calls.log");
    let script = dir.join("fake-ctf-to-chunks");
    let body = format!(
        "#!/bin/sh\n\
         echo \"$@\" >> \"{}\"\n\
         stem=$(basename \"$1\" | cut -d. -f1)\n\
         mkdir -p \"$3/$stem.chunks\"\n",
        log.display()
    );
    install_script(&script, &body);
    script
}

/// Script that exits successfully without writing anything
fn silent_script(dir: &Path) -> PathBuf {
    let script = dir.join("silent-to-chunks");
    install_script(&script, "#!/bin/sh\nexit 0\n");
    script
}

fn install_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// Source argument of each logged call
fn called_sources(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .filter_map(|line| line.split_whitespace().next().map(str::to_string))
        .collect()
}

fn call_count(dir: &Path) -> usize {
    fs::read_to_string(dir.join("calls.log"))
        .map(|log| log.lines().count())
        .unwrap_or(0)
}

fn enable_chunking(env: &mut TestEnv, command: &Path) {
    env.config.chunking.enabled = true;
    env.config
        .chunking
        .commands
        .insert("ctf".to_string(), command.display().to_string());
}

fn meg_options(env: &TestEnv) -> ImportOptions {
    let dataset = DatasetBuilder::new(&env.incoming("rye_meg"), "Rye MEG").unwrap();
    dataset
        .participants(&["sub-Rye01\tM\tMTL\tRYE\tControl"])
        .unwrap();
    dataset.meg("Rye01", Some("V1")).unwrap();

    let mut options = ImportOptions::new(&dataset.root);
    options.create_subject = true;
    options.create_visit = true;
    options
}

async fn only_file(catalog: &mut SqliteCatalog) -> dsi_common::db::PlacedFile {
    let id: i64 = sqlx::query_scalar("SELECT id FROM placed_files")
        .fetch_one(catalog.pool())
        .await
        .unwrap();
    catalog.find_placed_file(id).await.unwrap().unwrap()
}

#[tokio::test]
#[serial]
async fn test_import_chunks_once() {
    let mut env = create_test_env().await.unwrap();
    let script = chunking_script(env.data_dir());
    enable_chunking(&mut env, &script);
    let options = meg_options(&env);

    let report = env.import(&options).await.unwrap();
    assert_eq!(report.imported, 1, "{}", report.summary());
    assert!(!report.has_failures(), "{}", report.summary());
    assert_eq!(call_count(env.data_dir()), 1);
    assert!(env.data_dir().join(CHUNKS_PATH).is_dir());

    // Chunked from the dataset's recording directory, not the archive
    let sources = called_sources(env.data_dir());
    assert!(sources[0].starts_with(&options.dataset_dir.display().to_string()));
    assert!(sources[0].ends_with("sub-Rye01_ses-V1_task-rest_meg.ds"));

    let file = only_file(&mut env.catalog).await;
    assert_eq!(
        parameter_value(env.pool(), file.id, CHUNK_PATH_PARAMETER)
            .await
            .unwrap()
            .as_deref(),
        Some(CHUNKS_PATH)
    );

    // The recorded parameter short-circuits a second request
    let invoker = ChunkingInvoker::new(env.data_dir(), env.config.chunking.clone());
    let stored = env.data_dir().join(&file.path);
    let outcome = invoker.ensure_chunks(&mut env.catalog, &file, &stored).await.unwrap();
    assert_eq!(outcome, ChunkOutcome::AlreadyChunked(CHUNKS_PATH.to_string()));
    env.catalog.rollback().await.unwrap();
    assert_eq!(call_count(env.data_dir()), 1);
}

#[tokio::test]
#[serial]
async fn test_chunk_range_recovers_unchunked_files() {
    let mut env = create_test_env().await.unwrap();
    let options = meg_options(&env);

    // Imported with chunking disabled
    let report = env.import(&options).await.unwrap();
    assert_eq!(report.imported, 1, "{}", report.summary());
    let file = only_file(&mut env.catalog).await;
    env.catalog.commit().await.unwrap();

    let script = chunking_script(env.data_dir());
    enable_chunking(&mut env, &script);
    let invoker = ChunkingInvoker::new(env.data_dir(), env.config.chunking.clone());

    let first = invoker
        .chunk_range(&mut env.catalog, file.id, file.id + 10)
        .await
        .unwrap();
    assert_eq!(first.imported, 1, "{}", first.summary());
    assert!(env.data_dir().join(CHUNKS_PATH).is_dir());

    // The archived recording was unpacked for the call and removed afterwards
    let sources = called_sources(env.data_dir());
    assert!(sources[0].contains(".unpacked-"));
    assert!(sources[0].ends_with("sub-Rye01_ses-V1_task-rest_meg.ds"));
    assert!(!Path::new(&sources[0]).exists());

    let second = invoker
        .chunk_range(&mut env.catalog, file.id, file.id + 10)
        .await
        .unwrap();
    assert_eq!(second.imported, 0);
    assert_eq!(second.ignored, 1);
    assert_eq!(call_count(env.data_dir()), 1);
}

#[tokio::test]
#[serial]
async fn test_missing_command_fails_only_the_acquisition() {
    let mut env = create_test_env().await.unwrap();
    let missing = env.data_dir().join("no-such-chunker");
    enable_chunking(&mut env, &missing);
    let options = meg_options(&env);

    let report = env.import(&options).await.unwrap();
    assert_eq!(report.failures.len(), 1, "{}", report.summary());
    assert!(report.failures[0].message.contains("Chunking unavailable"));

    // Chunking runs after the acquisition is committed
    assert_eq!(count_rows(env.pool(), "placed_files").await.unwrap(), 1);
    let file = only_file(&mut env.catalog).await;
    assert!(parameter_value(env.pool(), file.id, CHUNK_PATH_PARAMETER)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
#[serial]
async fn test_missing_command_with_fail_fast_ends_the_run() {
    let mut env = create_test_env().await.unwrap();
    let missing = env.data_dir().join("no-such-chunker");
    enable_chunking(&mut env, &missing);
    env.config.chunking.fail_fast = true;
    let options = meg_options(&env);

    let result = env.import(&options).await;
    assert!(matches!(result, Err(ImportError::ChunkingUnavailable(_))));
}

#[tokio::test]
#[serial]
async fn test_command_without_output_is_a_failure() {
    let mut env = create_test_env().await.unwrap();
    let options = meg_options(&env);
    let report = env.import(&options).await.unwrap();
    assert_eq!(report.imported, 1, "{}", report.summary());
    let file = only_file(&mut env.catalog).await;

    let script = silent_script(env.data_dir());
    enable_chunking(&mut env, &script);
    let invoker = ChunkingInvoker::new(env.data_dir(), env.config.chunking.clone());

    let stored = env.data_dir().join(&file.path);
    let result = invoker.ensure_chunks(&mut env.catalog, &file, &stored).await;
    assert!(matches!(result, Err(ImportError::ChunkingFailed(_))));
    env.catalog.rollback().await.unwrap();
}

#[tokio::test]
#[serial]
async fn test_unsupported_file_type() {
    let mut env = create_test_env().await.unwrap();
    let options = meg_options(&env);
    env.import(&options).await.unwrap();
    let file = only_file(&mut env.catalog).await;

    env.config.chunking.commands.clear();
    let invoker = ChunkingInvoker::new(env.data_dir(), env.config.chunking.clone());
    assert!(!invoker.supports(&file.file_type));

    let stored = env.data_dir().join(&file.path);
    let result = invoker.ensure_chunks(&mut env.catalog, &file, &stored).await;
    assert!(matches!(result, Err(ImportError::UnsupportedType(_))));
    env.catalog.rollback().await.unwrap();
}
