//! Path management for the backup tool
//!
//! ## Path Resolution Order
//!
//! 1. `TGA_BACKUP_DATA_DIR` environment variable (if set)
//! 2. Unix (Linux/macOS): `$XDG_CONFIG_HOME/tgadmin-backup` or `~/.config/tgadmin-backup`
//! 3. Windows: `%APPDATA%\tgadmin-backup`

use std::path::{Path, PathBuf};

use crate::error::{BackupError, BackupResult};

/// Environment variable overriding the data directory
pub const DATA_DIR_ENV: &str = "TGA_BACKUP_DATA_DIR";

const APP_DIR: &str = "tgadmin-backup";

/// Manages all paths used by the backup tool
#[derive(Debug, Clone)]
pub struct BackupPaths {
    base_dir: PathBuf,
}

impl BackupPaths {
    /// Resolve the base directory from the environment
    pub fn new() -> BackupResult<Self> {
        let base_dir = match std::env::var(DATA_DIR_ENV) {
            Ok(custom) if !custom.is_empty() => PathBuf::from(custom),
            _ => resolve_default_path()?,
        };

        Ok(Self { base_dir })
    }

    /// Create paths under a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Default location of the application database
    pub fn database_file(&self) -> PathBuf {
        self.base_dir.join("data").join("tgadmin.db")
    }

    /// Default backup directory
    pub fn backup_dir(&self) -> PathBuf {
        self.base_dir.join("backups")
    }

    /// Host protection key for protected columns
    pub fn host_key_file(&self) -> PathBuf {
        self.base_dir.join("keys").join("host.key")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Create the base, data, key and backup directories
    pub fn ensure_directories(&self) -> BackupResult<()> {
        for dir in [
            self.base_dir.clone(),
            self.base_dir.join("data"),
            self.base_dir.join("keys"),
            self.backup_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                BackupError::Io(format!("Failed to create directory {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.settings_file().exists()
    }
}

#[cfg(not(windows))]
fn resolve_default_path() -> BackupResult<PathBuf> {
    let config_base = match std::env::var("XDG_CONFIG_HOME") {
        Ok(xdg) if !xdg.is_empty() => PathBuf::from(xdg),
        _ => {
            let home = std::env::var("HOME").map_err(|_| {
                BackupError::Configuration("HOME environment variable not set".into())
            })?;
            PathBuf::from(home).join(".config")
        }
    };
    Ok(config_base.join(APP_DIR))
}

#[cfg(windows)]
fn resolve_default_path() -> BackupResult<PathBuf> {
    let appdata = std::env::var("APPDATA").map_err(|_| {
        BackupError::Configuration("Could not determine APPDATA directory".into())
    })?;
    Ok(PathBuf::from(appdata).join(APP_DIR))
}
