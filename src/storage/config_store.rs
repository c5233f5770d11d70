//! Backup encryption settings on the global configuration row
//!
//! The global row is the `configs` row with `chat_id IS NULL`. It holds the
//! encryption settings as JSON and the backup passphrase, protected with
//! the host key. Callers read it once per operation.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::crypto::PBKDF2_ITERATIONS;
use crate::error::BackupResult;

/// Cipher recorded in the settings of newly enabled encryption
pub const ALGORITHM: &str = "AES-256-GCM";

/// Backup encryption settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEncryptionConfig {
    pub enabled: bool,
    pub algorithm: String,
    pub iterations: u32,
    pub created_at: Option<DateTime<Utc>>,
    pub last_rotated_at: Option<DateTime<Utc>>,
}

impl BackupEncryptionConfig {
    /// Settings for encryption enabled at `now`
    pub fn enabled_at(now: DateTime<Utc>) -> Self {
        Self {
            enabled: true,
            algorithm: ALGORITHM.to_string(),
            iterations: PBKDF2_ITERATIONS,
            created_at: Some(now),
            last_rotated_at: None,
        }
    }

    /// Settings after replacing the passphrase at `now`
    pub fn rotated_at(&self, now: DateTime<Utc>) -> Self {
        Self {
            enabled: true,
            algorithm: ALGORITHM.to_string(),
            iterations: PBKDF2_ITERATIONS,
            created_at: self.created_at.or(Some(now)),
            last_rotated_at: Some(now),
        }
    }
}

/// Settings and protected passphrase as stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEncryption {
    pub config: BackupEncryptionConfig,
    pub passphrase_encrypted: Option<String>,
}

/// Load the stored encryption settings, if any were ever saved
pub fn load_encryption_config(conn: &Connection) -> BackupResult<Option<StoredEncryption>> {
    let row: Option<(Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT backup_encryption_config, passphrase_encrypted FROM configs WHERE chat_id IS NULL",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((Some(json), passphrase_encrypted)) = row else {
        return Ok(None);
    };

    let config: BackupEncryptionConfig = serde_json::from_str(&json)?;
    Ok(Some(StoredEncryption {
        config,
        passphrase_encrypted: passphrase_encrypted.filter(|p| !p.is_empty()),
    }))
}

/// Write the encryption settings to the global row, creating it if needed
pub fn save_encryption_config(
    conn: &Connection,
    config: &BackupEncryptionConfig,
    passphrase_encrypted: Option<&str>,
) -> BackupResult<()> {
    let json = serde_json::to_string(config)?;
    let now = Utc::now().timestamp();

    let existing: Option<i64> = conn
        .query_row("SELECT id FROM configs WHERE chat_id IS NULL", [], |row| {
            row.get(0)
        })
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE configs SET backup_encryption_config = ?1, passphrase_encrypted = ?2, updated_at = ?3 WHERE id = ?4",
                params![json, passphrase_encrypted, now, id],
            )?;
        }
        None => {
            conn.execute(
                "INSERT INTO configs (chat_id, backup_encryption_config, passphrase_encrypted, created_at) VALUES (NULL, ?1, ?2, ?3)",
                params![json, passphrase_encrypted, now],
            )?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    #[test]
    fn test_load_without_row() {
        let db = Database::open_in_memory().unwrap();
        let stored = db.with_connection(|conn| load_encryption_config(conn)).unwrap();
        assert!(stored.is_none());
    }

    #[test]
    fn test_save_then_update_keeps_single_global_row() {
        let db = Database::open_in_memory().unwrap();
        let first = BackupEncryptionConfig::enabled_at(Utc::now());

        db.with_connection(|conn| {
            save_encryption_config(conn, &first, Some("protected-1"))?;
            let second = first.rotated_at(Utc::now());
            save_encryption_config(conn, &second, Some("protected-2"))?;

            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM configs WHERE chat_id IS NULL", [], |r| {
                    r.get(0)
                })?;
            assert_eq!(count, 1);

            let stored = load_encryption_config(conn)?.unwrap();
            assert_eq!(stored.passphrase_encrypted.as_deref(), Some("protected-2"));
            assert_eq!(stored.config.created_at, first.created_at);
            assert!(stored.config.last_rotated_at.is_some());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_config_json_is_camel_case() {
        let config = BackupEncryptionConfig::enabled_at(Utc::now());
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"lastRotatedAt\":null"));
        assert!(json.contains("\"algorithm\":\"AES-256-GCM\""));
    }
}
