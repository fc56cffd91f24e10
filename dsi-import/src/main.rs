//! dsi-import - dataset import command line
//!
//! `import` reconciles a dataset directory with the catalog; `chunk` creates
//! visualization chunks for a range of catalogued files.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dsi_common::config::{ImportConfig, CONFIG_FILE_ENV, DATA_DIR_ENV};
use dsi_import::catalog::SqliteCatalog;
use dsi_import::chunking::ChunkingInvoker;
use dsi_import::dataset::DatasetType;
use dsi_import::metadata::ElectrodesTableExtractor;
use dsi_import::{ImportOptions, Importer, RunReport};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "dsi-import")]
#[command(about = "Import BIDS-like datasets into the catalog")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, env = CONFIG_FILE_ENV)]
    config: Option<PathBuf>,

    /// Catalog data root
    #[arg(long, global = true, env = DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Import a dataset directory
    Import(ImportArgs),
    /// Create chunks for catalogued files in an id range
    Chunk(ChunkArgs),
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Dataset directory
    #[arg(short, long)]
    directory: PathBuf,

    /// Create subjects missing from the catalog
    #[arg(long)]
    create_subject: bool,

    /// Create visits missing from the catalog
    #[arg(long)]
    create_visit: bool,

    /// Check that the directory is named <label>_<identifier> and matches the catalog
    #[arg(long)]
    ids_validation: bool,

    /// Skip the dataset layout check
    #[arg(long)]
    no_validation: bool,

    /// Reference files in place instead of copying them
    #[arg(long)]
    no_copy: bool,

    /// Dataset type, when dataset_description.json does not give one
    #[arg(long = "type", value_name = "raw|derivative")]
    dataset_type: Option<DatasetType>,
}

#[derive(Args, Debug)]
struct ChunkArgs {
    /// Smallest file id to chunk
    #[arg(long)]
    smallest_id: i64,

    /// Largest file id to chunk
    #[arg(long)]
    largest_id: i64,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = ImportConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    let default_level = if cli.verbose { "debug" } else { config.logging.level.as_str() };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting dsi-import {}", env!("CARGO_PKG_VERSION"));

    let data_dir = config.resolve_data_dir(cli.data_dir.as_deref());
    let db_path = config.database_path(&data_dir);
    info!(data_dir = %data_dir.display(), database = %db_path.display(), "Catalog location");

    let mut catalog = SqliteCatalog::open(&db_path)
        .await
        .context("Failed to open catalog")?;

    let report = match cli.command {
        Command::Import(args) => run_import(&config, &data_dir, &mut catalog, args).await?,
        Command::Chunk(args) => {
            let invoker = ChunkingInvoker::new(&data_dir, config.chunking.clone());
            invoker
                .chunk_range(&mut catalog, args.smallest_id, args.largest_id)
                .await
                .context("Chunking run failed")?
        }
    };

    println!("{}", report.summary());
    Ok(if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn run_import(
    config: &ImportConfig,
    data_dir: &Path,
    catalog: &mut SqliteCatalog,
    args: ImportArgs,
) -> Result<RunReport> {
    let options = ImportOptions {
        dataset_dir: args.directory,
        dataset_type: args.dataset_type,
        validate: !args.no_validation,
        ids_validation: args.ids_validation,
        create_subject: args.create_subject,
        create_visit: args.create_visit,
        copy_files: !args.no_copy,
    };

    let extractor = ElectrodesTableExtractor;
    let importer = Importer::new(config, data_dir, &extractor);
    importer
        .run(catalog, &options)
        .await
        .with_context(|| format!("Import of '{}' failed", options.dataset_dir.display()))
}
