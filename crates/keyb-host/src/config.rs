//! TOML configuration for the keyboard engine.
//!
//! Reads and writes the `[keyboard]` section from the platform config
//! file:
//!
//! ```toml
//! [keyboard]
//! layout = "gr"
//! codepage = 858
//! codepage_file = "auto"
//! resource_dir = "./resources"
//! ```
//!
//! Every field has a serde default, so a missing file, an empty file, or
//! a file from an older version all load cleanly.  A `codepage` of 0
//! means "extract the code page from the layout file".

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub keyboard: KeyboardConfig,
}

/// The `[keyboard]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyboardConfig {
    /// Layout id to load at startup; `"none"` keeps US pass-through.
    #[serde(default = "default_layout")]
    pub layout: String,
    /// Code page id; 0 auto-extracts the page from the layout file.
    #[serde(default)]
    pub codepage: u16,
    /// Code-page file name; `"auto"` selects the bundled archive.
    #[serde(default = "default_codepage_file")]
    pub codepage_file: String,
    /// Directory searched for `.KL`/`.KCL`/`.CPI`/`.CPX` files.
    #[serde(default = "default_resource_dir")]
    pub resource_dir: PathBuf,
}

fn default_layout() -> String {
    "none".to_string()
}
fn default_codepage_file() -> String {
    "auto".to_string()
}
fn default_resource_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self { keyboard: KeyboardConfig::default() }
    }
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self {
            layout: default_layout(),
            codepage: 0,
            codepage_file: default_codepage_file(),
            resource_dir: default_resource_dir(),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the base directory
/// cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory
/// cannot be determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("keyb.toml"))
}

/// Loads the config from disk, returning defaults if the file does not
/// yet exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not
/// found", and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let path = config_file_path()?;
    load_config_from(&path)
}

/// Loads the config from an explicit path (the CLI's `--config` flag).
///
/// # Errors
///
/// Same surface as [`load_config`].
pub fn load_config_from(path: &std::path::Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(source) => Err(ConfigError::Io { path: path.to_path_buf(), source }),
    }
}

/// Persists `config` to disk, creating the directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config(config: &AppConfig) -> Result<(), ConfigError> {
    let path = config_file_path()?;
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .map_err(|source| ConfigError::Io { path: dir.to_path_buf(), source })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(&path, content).map_err(|source| ConfigError::Io { path: path.clone(), source })
}

/// Resolves the platform config base directory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("keyb"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("keyb"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
