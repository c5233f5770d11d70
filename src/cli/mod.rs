//! CLI command handlers
//!
//! This module bridges the clap argument parsing with the backup service.

pub mod backup;
pub mod encrypt;

use std::sync::Arc;

use crate::backup::{BackupManager, BackupService};
use crate::config::{BackupPaths, Settings};
use crate::crypto::{HostKeyProtector, SecureString};
use crate::error::{BackupError, BackupResult};
use crate::storage::Database;

pub use backup::{handle_backup_command, BackupCommands};
pub use encrypt::{handle_encrypt_command, EncryptCommands};

/// Paths and settings shared by every command
pub struct CliContext {
    pub paths: BackupPaths,
    pub settings: Settings,
}

impl CliContext {
    pub fn new(paths: BackupPaths, settings: Settings) -> Self {
        Self { paths, settings }
    }

    /// Resolve paths from the environment and load settings
    pub fn load() -> BackupResult<Self> {
        let paths = BackupPaths::new()?;
        let settings = Settings::load_or_create(&paths)?;
        Ok(Self::new(paths, settings))
    }

    /// Open the database and host key and build the service
    pub fn open_service(&self) -> BackupResult<BackupService> {
        let db = Database::open(self.settings.database_file(&self.paths))?;
        let protector = HostKeyProtector::load_or_create(&self.paths.host_key_file())?;
        Ok(BackupService::new(Arc::new(db), Arc::new(protector))
            .with_options(self.settings.backup_options()))
    }

    pub fn manager(&self) -> BackupManager {
        BackupManager::new(self.settings.backup_dir(&self.paths), self.settings.retention)
    }
}

/// Prompt for a passphrase (hidden input)
pub(crate) fn prompt_passphrase(prompt: &str) -> BackupResult<SecureString> {
    rpassword::prompt_password(prompt)
        .map(SecureString::from)
        .map_err(|e| BackupError::Io(format!("Failed to read passphrase: {}", e)))
}

/// Prompt for a new passphrase with confirmation
pub(crate) fn prompt_new_passphrase() -> BackupResult<SecureString> {
    loop {
        let first = prompt_passphrase("Enter new passphrase: ")?;
        if first.len() < 8 {
            println!("Passphrase must be at least 8 characters. Please try again.");
            continue;
        }

        let second = prompt_passphrase("Confirm passphrase: ")?;
        if first != second {
            println!("Passphrases do not match. Please try again.");
            continue;
        }

        return Ok(first);
    }
}
