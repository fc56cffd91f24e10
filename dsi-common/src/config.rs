//! Configuration loading and data root resolution
//!
//! Settings are layered with the following priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the catalog data root
pub const DATA_DIR_ENV: &str = "DSI_DATA_DIR";

/// Environment variable naming an explicit TOML config file
pub const CONFIG_FILE_ENV: &str = "DSI_CONFIG";

/// File name of the catalog database inside the data root
const DEFAULT_DATABASE_FILE: &str = "catalog.db";

/// Import tool configuration (TOML file contents)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Catalog data root; every catalog file path is relative to it
    pub data_dir: Option<PathBuf>,

    /// Catalog database file (defaults to `<data_dir>/catalog.db`)
    pub database: Option<PathBuf>,

    /// Visit label used when a dataset has no session directories
    pub default_visit_label: Option<String>,

    /// Visualization chunking settings
    pub chunking: ChunkingConfig,

    /// Logging settings
    pub logging: LoggingConfig,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            database: None,
            default_visit_label: None,
            chunking: ChunkingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Settings for the external signal chunking executables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Whether visualization chunks are created after each import
    pub enabled: bool,

    /// Explicit chunk output root; derived from the file path when unset
    pub chunk_root: Option<PathBuf>,

    /// Channel count passed to commands that accept one
    pub channel_count: u32,

    /// Terminate the whole run on a chunking failure instead of failing
    /// only the current acquisition
    pub fail_fast: bool,

    /// Chunking command per file type (`ctf`, `edf`, `set`, ...)
    pub commands: BTreeMap<String, String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        let commands = [
            ("ctf", "ctf-to-chunks"),
            ("edf", "edf-to-chunks"),
            ("set", "eeglab-to-chunks"),
        ]
        .into_iter()
        .map(|(file_type, command)| (file_type.to_string(), command.to_string()))
        .collect();

        Self {
            enabled: false,
            chunk_root: None,
            channel_count: 10,
            fail_fast: false,
            commands,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter directive (`info`, `debug`, `dsi_import=trace`, ...)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ImportConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load a configuration file, or the defaults if no file is found
    ///
    /// The file is taken from `explicit`, then `DSI_CONFIG`, then the
    /// platform config directory.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => match std::env::var(CONFIG_FILE_ENV) {
                Ok(path) => Some(PathBuf::from(path)),
                Err(_) => default_config_file(),
            },
        };

        let Some(path) = path else {
            debug!("No config file found, using defaults");
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!("Read config '{}' failed: {}", path.display(), e))
        })?;

        info!(path = %path.display(), "Loaded configuration file");
        Self::from_toml_str(&content)
    }

    /// Resolve the catalog data root
    ///
    /// **Priority:** CLI → `DSI_DATA_DIR` → TOML → OS default
    pub fn resolve_data_dir(&self, cli_arg: Option<&Path>) -> PathBuf {
        if let Some(path) = cli_arg {
            return path.to_path_buf();
        }

        if let Ok(path) = std::env::var(DATA_DIR_ENV) {
            return PathBuf::from(path);
        }

        if let Some(path) = &self.data_dir {
            return path.clone();
        }

        default_data_dir()
    }

    /// Catalog database path for a resolved data root
    pub fn database_path(&self, data_dir: &Path) -> PathBuf {
        self.database
            .clone()
            .unwrap_or_else(|| data_dir.join(DEFAULT_DATABASE_FILE))
    }
}

/// Get the default configuration file path for the platform, if one exists
fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("dsi").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/dsi/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Get OS-dependent default data root
fn default_data_dir() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/dsi (or /var/lib/dsi for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("dsi"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/dsi"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("dsi"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/dsi"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("dsi"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\dsi"))
    } else {
        PathBuf::from("./dsi_data")
    }
}
