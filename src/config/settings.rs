//! User settings for the backup tool

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::paths::BackupPaths;
use crate::backup::{BackupOptions, RetentionConfig, DEFAULT_BATCH_SIZE};
use crate::error::{BackupError, BackupResult};
use crate::storage::{read_json, write_json_atomic};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Database file; defaults to the data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_file: Option<PathBuf>,

    /// Backup directory; defaults to the data directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_dir: Option<PathBuf>,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// gzip level for archive table data (0-9)
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Rotate the backup directory after every export
    #[serde(default = "default_true")]
    pub rotate_after_export: bool,
}

fn default_schema_version() -> u32 {
    1
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_compression_level() -> u32 {
    6
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            database_file: None,
            backup_dir: None,
            retention: RetentionConfig::default(),
            batch_size: default_batch_size(),
            compression_level: default_compression_level(),
            rotate_after_export: true,
        }
    }
}

impl Settings {
    /// Load settings from disk, or defaults if the file doesn't exist
    pub fn load_or_create(paths: &BackupPaths) -> BackupResult<Self> {
        let settings: Settings = read_json(paths.settings_file()).map_err(|e| {
            BackupError::Configuration(format!("Failed to load settings file: {}", e))
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn save(&self, paths: &BackupPaths) -> BackupResult<()> {
        paths.ensure_directories()?;
        write_json_atomic(paths.settings_file(), self)
    }

    pub fn validate(&self) -> BackupResult<()> {
        if self.batch_size == 0 {
            return Err(BackupError::Configuration(
                "batch_size must be at least 1".into(),
            ));
        }
        if self.compression_level > 9 {
            return Err(BackupError::Configuration(format!(
                "compression_level must be 0-9, got {}",
                self.compression_level
            )));
        }
        Ok(())
    }

    pub fn database_file(&self, paths: &BackupPaths) -> PathBuf {
        self.database_file
            .clone()
            .unwrap_or_else(|| paths.database_file())
    }

    pub fn backup_dir(&self, paths: &BackupPaths) -> PathBuf {
        self.backup_dir.clone().unwrap_or_else(|| paths.backup_dir())
    }

    pub fn backup_options(&self) -> BackupOptions {
        BackupOptions {
            batch_size: self.batch_size,
            compression_level: self.compression_level,
            ..BackupOptions::default()
        }
    }
}
