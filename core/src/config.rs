//! Engine configuration, loaded from TOML.
//!
//! Lookup order for [`EngineConfig::load_default`]: the file named by
//! `$PINSNAP_CONFIG`, then `pinsnap.toml` in the platform config directory,
//! then built-in defaults.

use crate::snapshot::SnapshotOptions;
use crate::{Error, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const CONFIG_ENV: &str = "PINSNAP_CONFIG";
pub const CONFIG_FILE_NAME: &str = "pinsnap.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Prefix of generated backup names.
    pub name_prefix: String,
    /// Gitignore-style patterns skipped while snapshotting.
    pub exclude_patterns: Vec<String>,
    pub max_file_size: Option<u64>,
    /// Files read at once during a snapshot.
    pub concurrency: usize,
    pub follow_links: bool,
    /// Level for `pinsnap_*` targets when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name_prefix: "backup".to_string(),
            exclude_patterns: Vec::new(),
            max_file_size: None,
            concurrency: 16,
            follow_links: false,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(Error::file("read", path))?;
        let config = Self::parse(&content).map_err(|msg| {
            Error::Config(format!("{}: {}", path.display(), msg))
        })?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Self::parse(content).map_err(Error::Config)
    }

    fn parse(content: &str) -> std::result::Result<Self, String> {
        let config: Self = toml::from_str(content).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_default() -> Result<Self> {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::load(PathBuf::from(path));
        }
        match Self::default_path() {
            Some(path) if path.is_file() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "pinsnap").map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn snapshot_options(&self) -> SnapshotOptions {
        SnapshotOptions {
            exclude_patterns: self.exclude_patterns.clone(),
            max_file_size: self.max_file_size,
            encryption: None,
            concurrency: self.concurrency,
            follow_links: self.follow_links,
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.name_prefix.trim().is_empty() {
            return Err("name_prefix must not be empty".to_string());
        }
        if self.concurrency == 0 {
            return Err("concurrency must be at least 1".to_string());
        }
        Ok(())
    }
}
