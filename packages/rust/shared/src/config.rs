//! Application configuration for the images field tooling.
//!
//! User config lives at `~/.imagefield/imagefield.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ImageFieldError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "imagefield.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".imagefield";

// ---------------------------------------------------------------------------
// Config structs (matching imagefield.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Local file storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Item database location.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Maximum uploads in flight per reconciliation. 0 means unbounded.
    #[serde(default)]
    pub upload_concurrency: usize,

    /// Reject submissions naming an upload reference that wasn't received.
    #[serde(default)]
    pub strict_upload_refs: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            upload_concurrency: 0,
            strict_upload_refs: false,
        }
    }
}

fn default_database_path() -> String {
    "~/.imagefield/items.db".into()
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory stored files are written to.
    #[serde(default = "default_root_dir")]
    pub root_dir: String,

    /// Base URL stored files are served from.
    #[serde(default = "default_public_url")]
    pub public_url: String,

    /// Timeout for fetching remote (`http`/`https`) sources.
    #[serde(default = "default_remote_timeout")]
    pub remote_timeout_secs: u64,

    /// Directories local file sources may be read from. Empty allows any path.
    #[serde(default)]
    pub allowed_source_dirs: Vec<String>,

    /// Largest source accepted, in bytes. 0 = no limit.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            public_url: default_public_url(),
            remote_timeout_secs: default_remote_timeout(),
            allowed_source_dirs: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_root_dir() -> String {
    "~/.imagefield/uploads".into()
}
fn default_public_url() -> String {
    "/uploads".into()
}
fn default_remote_timeout() -> u64 {
    30
}
fn default_max_upload_bytes() -> u64 {
    25 * 1024 * 1024
}

// ---------------------------------------------------------------------------
// Field config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime options for an images field.
#[derive(Debug, Clone, Default)]
pub struct FieldConfig {
    /// Upload concurrency cap; `None` dispatches every upload at once.
    pub upload_concurrency: Option<usize>,
    /// Whether a missing upload reference fails the pass.
    pub strict_upload_refs: bool,
}

impl From<&AppConfig> for FieldConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            upload_concurrency: match config.defaults.upload_concurrency {
                0 => None,
                n => Some(n),
            },
            strict_upload_refs: config.defaults.strict_upload_refs,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.imagefield/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ImageFieldError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.imagefield/imagefield.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ImageFieldError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        ImageFieldError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ImageFieldError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ImageFieldError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ImageFieldError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| ImageFieldError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}
