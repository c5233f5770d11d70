//! Backup service facade
//!
//! The one entry point callers use. Export walks the schema catalog,
//! streams each table into the archive codec and optionally encrypts the
//! result; restore decrypts first, so a wrong passphrase is reported before
//! anything is deleted, then hands the archive to the restore engine.
//!
//! The stored encryption settings are read once per operation.

use std::borrow::Cow;
use std::sync::Arc;

use chrono::Utc;
use flate2::Compression;
use tracing::info;

use crate::cancel::CancellationToken;
use crate::crypto::{self, purposes, DataProtector, SecureString};
use crate::error::{BackupError, BackupResult};
use crate::schema::SchemaCatalog;
use crate::storage::{config_store, BackupEncryptionConfig, Database};

use super::archive::{self, ArchiveMetadata, ArchiveReader, ArchiveWriter};
use super::dependency::{edges_from_database, DependencyResolver};
use super::exporter::{TableExportStats, TableExporter};
use super::field_protection::FieldProtectionBridge;
use super::restore::{RestoreEngine, RestoreReport, DEFAULT_BATCH_SIZE};

/// Tunables for export and restore
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Rows inserted between cancellation checks during restore
    pub batch_size: usize,
    /// gzip level 0-9 for the table data block
    pub compression_level: u32,
    /// Recorded in archive metadata
    pub app_version: String,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            compression_level: 6,
            app_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Counters for one export
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportStats {
    /// In archive order
    pub tables: Vec<TableExportStats>,
    pub encrypted: bool,
    pub archive_bytes: usize,
}

impl ExportStats {
    pub fn total_rows(&self) -> u64 {
        self.tables.iter().map(|t| t.rows).sum()
    }

    pub fn protected_fields(&self) -> u64 {
        self.tables.iter().map(|t| t.protected_fields).sum()
    }

    pub fn passed_through(&self) -> u64 {
        self.tables.iter().map(|t| t.passed_through).sum()
    }
}

/// Metadata and per-table row counts of an archive
#[derive(Debug, Clone)]
pub struct ArchiveInspection {
    pub metadata: ArchiveMetadata,
    pub encrypted: bool,
    pub size_bytes: usize,
    pub row_counts: Vec<(String, u64)>,
}

pub struct BackupService {
    db: Arc<Database>,
    catalog: SchemaCatalog,
    bridge: FieldProtectionBridge,
    options: BackupOptions,
}

impl BackupService {
    pub fn new(db: Arc<Database>, protector: Arc<dyn DataProtector>) -> Self {
        Self {
            db,
            catalog: SchemaCatalog::application(),
            bridge: FieldProtectionBridge::new(protector),
            options: BackupOptions::default(),
        }
    }

    pub fn with_options(mut self, options: BackupOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_catalog(mut self, catalog: SchemaCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    /// Export, encrypting with the stored passphrase when encryption is enabled
    pub fn export(&self) -> BackupResult<Vec<u8>> {
        let passphrase = self.configured_passphrase()?;
        let (bytes, _) = self.export_with(passphrase.as_deref(), &CancellationToken::new())?;
        Ok(bytes)
    }

    /// Export encrypted with `passphrase`, ignoring the stored settings
    pub fn export_with_passphrase(&self, passphrase: &str) -> BackupResult<Vec<u8>> {
        let (bytes, _) = self.export_with(Some(passphrase), &CancellationToken::new())?;
        Ok(bytes)
    }

    /// Export with an explicit passphrase (or none) and cancellation
    #[tracing::instrument(skip_all, fields(encrypted = passphrase.is_some()))]
    pub fn export_with(
        &self,
        passphrase: Option<&str>,
        cancel: &CancellationToken,
    ) -> BackupResult<(Vec<u8>, ExportStats)> {
        if passphrase.map_or(false, str::is_empty) {
            return Err(BackupError::Validation("Passphrase cannot be empty".into()));
        }

        let (plain, tables) = self.db.with_connection(|conn| {
            let discovered = self.catalog.discover(conn)?;
            let names: Vec<String> = discovered.iter().map(|d| d.name.to_string()).collect();
            let edges = edges_from_database(conn, &discovered)?;
            let order = DependencyResolver::order(&names, &edges)?;

            let metadata = ArchiveMetadata::new(&self.options.app_version, order.tables.clone());
            let mut writer = ArchiveWriter::with_compression(
                Vec::new(),
                &metadata,
                Compression::new(self.options.compression_level.min(9)),
            )?;

            let exporter = TableExporter::new(&self.bridge);
            let mut tables = Vec::with_capacity(order.tables.len());
            for name in &order.tables {
                let descriptor = self.catalog.descriptor(name).ok_or_else(|| {
                    BackupError::Configuration(format!(
                        "Table '{}' has no registered mapping",
                        name
                    ))
                })?;
                tables.push(exporter.export_to(conn, descriptor, &mut writer, cancel)?);
            }

            Ok((writer.finish()?, tables))
        })?;

        cancel.check()?;
        let bytes = match passphrase {
            Some(passphrase) => crypto::encrypt_archive(&plain, passphrase)?,
            None => plain,
        };

        let stats = ExportStats {
            tables,
            encrypted: passphrase.is_some(),
            archive_bytes: bytes.len(),
        };
        info!(
            tables = stats.tables.len(),
            rows = stats.total_rows(),
            bytes = stats.archive_bytes,
            passed_through = stats.passed_through(),
            "Export complete"
        );
        Ok((bytes, stats))
    }

    /// Restore, decrypting with the stored passphrase if the archive is encrypted
    pub fn restore(&self, archive: &[u8]) -> BackupResult<RestoreReport> {
        if crypto::is_encrypted(archive) {
            let passphrase = self.get_decrypted_passphrase()?;
            self.restore_with(archive, Some(passphrase.as_str()), &CancellationToken::new())
        } else {
            self.restore_with(archive, None, &CancellationToken::new())
        }
    }

    pub fn restore_with_passphrase(
        &self,
        archive: &[u8],
        passphrase: &str,
    ) -> BackupResult<RestoreReport> {
        self.restore_with(archive, Some(passphrase), &CancellationToken::new())
    }

    /// Replace the database contents with `archive`
    ///
    /// The passphrase is only used when the archive is encrypted.
    #[tracing::instrument(skip_all, fields(bytes = archive.len()))]
    pub fn restore_with(
        &self,
        archive: &[u8],
        passphrase: Option<&str>,
        cancel: &CancellationToken,
    ) -> BackupResult<RestoreReport> {
        let plain = self.open_archive(archive, passphrase)?;
        let reader = ArchiveReader::new(plain.as_ref())?;
        info!(
            created_at = reader.metadata().created_at,
            tables = reader.metadata().table_count,
            "Restoring archive"
        );

        self.db.with_connection(|conn| {
            RestoreEngine::new(&self.catalog, &self.bridge)
                .with_batch_size(self.options.batch_size)
                .with_cancellation(cancel.clone())
                .apply(conn, reader)
        })
    }

    /// Archive metadata; plain archives only read the metadata block
    pub fn get_metadata(
        &self,
        archive: &[u8],
        passphrase: Option<&str>,
    ) -> BackupResult<ArchiveMetadata> {
        let plain = self.open_archive(archive, passphrase)?;
        archive::read_metadata(&plain)
    }

    pub fn is_encrypted(&self, archive: &[u8]) -> bool {
        crypto::is_encrypted(archive)
    }

    /// Decode the whole archive and count rows per table
    pub fn inspect(
        &self,
        archive: &[u8],
        passphrase: Option<&str>,
    ) -> BackupResult<ArchiveInspection> {
        let plain = self.open_archive(archive, passphrase)?;
        let mut reader = ArchiveReader::new(plain.as_ref())?;

        let mut row_counts = Vec::new();
        while let Some(table) = reader.next_table()? {
            let mut rows = 0;
            while reader.next_row()?.is_some() {
                rows += 1;
            }
            row_counts.push((table, rows));
        }

        Ok(ArchiveInspection {
            metadata: reader.metadata().clone(),
            encrypted: crypto::is_encrypted(archive),
            size_bytes: archive.len(),
            row_counts,
        })
    }

    /// Check `passphrase` against an encrypted archive without restoring it
    pub fn verify_passphrase(&self, archive: &[u8], passphrase: &str) -> BackupResult<()> {
        if !crypto::is_encrypted(archive) {
            return Err(BackupError::Validation("Archive is not encrypted".into()));
        }
        self.open_archive(archive, Some(passphrase)).map(|_| ())
    }

    /// Store `passphrase` (protected with the host key) and enable encryption
    pub fn save_encryption_config(&self, passphrase: &str) -> BackupResult<()> {
        if passphrase.is_empty() {
            return Err(BackupError::Validation("Passphrase cannot be empty".into()));
        }
        let protected = self
            .bridge
            .protector()
            .protect(purposes::BACKUP_PASSPHRASE, passphrase)?;

        self.db.with_connection(|conn| {
            let now = Utc::now();
            let config = match config_store::load_encryption_config(conn)? {
                Some(stored) => stored.config.rotated_at(now),
                None => BackupEncryptionConfig::enabled_at(now),
            };
            config_store::save_encryption_config(conn, &config, Some(&protected))?;
            info!(rotated = config.last_rotated_at.is_some(), "Saved backup encryption settings");
            Ok(())
        })
    }

    /// The stored backup passphrase
    pub fn get_decrypted_passphrase(&self) -> BackupResult<SecureString> {
        let stored = self
            .db
            .with_connection(|conn| config_store::load_encryption_config(conn))?;

        let protected = stored
            .and_then(|s| s.passphrase_encrypted)
            .ok_or_else(|| {
                BackupError::Configuration("No backup passphrase is configured".into())
            })?;

        self.bridge
            .protector()
            .unprotect(purposes::BACKUP_PASSPHRASE, &protected)
            .map(SecureString::from)
    }

    /// Turn encryption off and forget the passphrase; returns whether it was on
    pub fn disable_encryption(&self) -> BackupResult<bool> {
        self.db.with_connection(|conn| {
            let Some(stored) = config_store::load_encryption_config(conn)? else {
                return Ok(false);
            };
            let was_enabled = stored.config.enabled;
            let config = BackupEncryptionConfig {
                enabled: false,
                ..stored.config
            };
            config_store::save_encryption_config(conn, &config, None)?;
            Ok(was_enabled)
        })
    }

    pub fn encryption_status(&self) -> BackupResult<Option<BackupEncryptionConfig>> {
        let stored = self
            .db
            .with_connection(|conn| config_store::load_encryption_config(conn))?;
        Ok(stored.map(|s| s.config))
    }

    /// Stored passphrase if encryption is enabled
    fn configured_passphrase(&self) -> BackupResult<Option<SecureString>> {
        let stored = self
            .db
            .with_connection(|conn| config_store::load_encryption_config(conn))?;

        match stored {
            Some(stored) if stored.config.enabled => {
                let protected = stored.passphrase_encrypted.ok_or_else(|| {
                    BackupError::Configuration(
                        "Backup encryption is enabled but no passphrase is configured".into(),
                    )
                })?;
                self.bridge
                    .protector()
                    .unprotect(purposes::BACKUP_PASSPHRASE, &protected)
                    .map(|p| Some(SecureString::from(p)))
            }
            _ => Ok(None),
        }
    }

    /// The plain archive: `archive` itself, or its decryption under `passphrase`
    pub fn open_archive<'b>(
        &self,
        archive: &'b [u8],
        passphrase: Option<&str>,
    ) -> BackupResult<Cow<'b, [u8]>> {
        if !crypto::is_encrypted(archive) {
            return Ok(Cow::Borrowed(archive));
        }

        let passphrase = passphrase.ok_or_else(|| {
            BackupError::Configuration("Archive is encrypted and no passphrase was given".into())
        })?;
        crypto::decrypt_archive(archive, passphrase).map(Cow::Owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, count, invited_by, row_counts};
    use std::time::{Duration, Instant};

    fn seeded_service() -> BackupService {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let protector = testing::protector();
        testing::seed(&db, protector.as_ref()).unwrap();
        BackupService::new(db, protector)
    }

    fn empty_service_on_other_host() -> BackupService {
        let db = Arc::new(Database::open_in_memory().unwrap());
        BackupService::new(db, testing::other_host_protector())
    }

    fn global_bot_token(service: &BackupService) -> String {
        service
            .database()
            .with_connection(|conn| {
                Ok(conn.query_row(
                    "SELECT bot_token_encrypted FROM configs WHERE chat_id IS NULL",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap()
    }

    #[test]
    fn test_export_restore_into_empty_database() {
        let source = seeded_service();
        let target = empty_service_on_other_host();

        let archive = source.export().unwrap();
        assert!(!source.is_encrypted(&archive));

        let report = target.restore(&archive).unwrap();
        assert_eq!(row_counts(target.database()), row_counts(source.database()));
        assert_eq!(report.rows_for("users"), Some(testing::USER_COUNT as u64));
        assert_eq!(report.self_referencing, vec!["users".to_string()]);

        // Cache tables are never exported
        assert_eq!(count(target.database(), "url_lookup_cache"), 0);
        assert!(!archive::read_metadata(&archive)
            .unwrap()
            .tables
            .contains(&"url_lookup_cache".to_string()));
    }

    #[test]
    fn test_eight_users_with_invited_by_round_trip() {
        let source = seeded_service();
        let target = empty_service_on_other_host();

        target.restore(&source.export().unwrap()).unwrap();

        assert_eq!(count(target.database(), "users"), 8);
        assert_eq!(
            invited_by(target.database(), testing::INVITEE).as_deref(),
            Some(testing::INVITER)
        );
        assert_eq!(
            invited_by(target.database(), testing::INVITEE),
            invited_by(source.database(), testing::INVITEE)
        );
    }

    #[test]
    fn test_protected_fields_are_reencrypted_for_target_host() {
        let source = seeded_service();
        let target = empty_service_on_other_host();

        let (archive, stats) = source
            .export_with(None, &CancellationToken::new())
            .unwrap();
        assert_eq!(stats.protected_fields(), 3);
        assert_eq!(stats.passed_through(), 0);

        let report = target.restore(&archive).unwrap();
        assert_eq!(report.fields_reencrypted, 3);

        let restored = global_bot_token(&target);
        assert_ne!(restored, global_bot_token(&source));
        assert_eq!(
            testing::other_host_protector()
                .unprotect(purposes::BOT_TOKEN, &restored)
                .unwrap(),
            testing::BOT_TOKEN
        );
    }

    #[test]
    fn test_restore_twice_gives_same_counts() {
        let source = seeded_service();
        let target = empty_service_on_other_host();
        let archive = source.export_with_passphrase("correct-passphrase").unwrap();

        target.restore_with_passphrase(&archive, "correct-passphrase").unwrap();
        let first = row_counts(target.database());
        target.restore_with_passphrase(&archive, "correct-passphrase").unwrap();
        let second = row_counts(target.database());

        assert_eq!(first, second);
    }

    #[test]
    fn test_wrong_passphrase_leaves_database_untouched() {
        let source = seeded_service();
        let archive = source.export_with_passphrase("correct-passphrase").unwrap();

        let target = seeded_service();
        target
            .database()
            .with_connection(|conn| {
                conn.execute("DELETE FROM stop_words WHERE word = 'giveaway'", [])?;
                Ok(())
            })
            .unwrap();
        let before = row_counts(target.database());

        let err = target
            .restore_with_passphrase(&archive, "wrong-passphrase")
            .unwrap_err();
        assert!(err.is_crypto());
        assert_eq!(row_counts(target.database()), before);
    }

    #[test]
    fn test_tampered_archive_is_rejected_before_wipe() {
        let source = seeded_service();
        let mut archive = source.export_with_passphrase("correct-passphrase").unwrap();
        let middle = archive.len() / 2;
        archive[middle] ^= 0x01;

        let target = seeded_service();
        let before = row_counts(target.database());
        let err = target
            .restore_with_passphrase(&archive, "correct-passphrase")
            .unwrap_err();

        assert!(err.is_crypto());
        assert_eq!(row_counts(target.database()), before);
    }

    #[test]
    fn test_new_rows_after_restore_do_not_collide() {
        let source = seeded_service();
        let target = empty_service_on_other_host();
        target.restore(&source.export().unwrap()).unwrap();

        target
            .database()
            .with_connection(|conn| {
                for table in [
                    "verification_tokens",
                    "detection_results",
                    "user_actions",
                    "stop_words",
                    "audit_log",
                    "configs",
                ] {
                    let max: i64 = conn.query_row(
                        &format!("SELECT COALESCE(MAX(id), 0) FROM {}", table),
                        [],
                        |r| r.get(0),
                    )?;
                    let sql = match table {
                        "verification_tokens" => "INSERT INTO verification_tokens (user_id, token_type, token, created_at, expires_at) VALUES ('user-01', 't', 'x', 0, 0)",
                        "detection_results" => "INSERT INTO detection_results (message_id, detected_at, detection_source, detection_method, is_spam, confidence) VALUES (1, 0, 'auto', 'Bayes', 0, 1)",
                        "user_actions" => "INSERT INTO user_actions (user_id, action_type, issued_at) VALUES (1001, 'warn', 0)",
                        "stop_words" => "INSERT INTO stop_words (word, enabled, added_date) VALUES ('new-word', 1, 0)",
                        "audit_log" => "INSERT INTO audit_log (event_type, timestamp) VALUES (1, 0)",
                        _ => "INSERT INTO configs (chat_id, created_at) VALUES (-1002, 0)",
                    };
                    conn.execute(sql, [])?;
                    assert_eq!(conn.last_insert_rowid(), max + 1, "{}", table);
                }
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_export_uses_stored_passphrase() {
        let service = seeded_service();
        service.save_encryption_config("stored-passphrase").unwrap();

        let archive = service.export().unwrap();
        assert!(service.is_encrypted(&archive));
        service.verify_passphrase(&archive, "stored-passphrase").unwrap();

        let metadata = service.get_metadata(&archive, Some("stored-passphrase")).unwrap();
        assert_eq!(metadata.table_count, metadata.tables.len());

        // Restore without a passphrase falls back to the stored one
        let report = service.restore(&archive).unwrap();
        assert_eq!(report.rows_for("users"), Some(testing::USER_COUNT as u64));
    }

    #[test]
    fn test_encrypted_archive_requires_a_passphrase() {
        let service = seeded_service();
        let archive = service.export_with_passphrase("correct-passphrase").unwrap();

        let err = service.get_metadata(&archive, None).unwrap_err();
        assert!(matches!(err, BackupError::Configuration(_)));

        let err = empty_service_on_other_host().restore(&archive).unwrap_err();
        assert!(matches!(err, BackupError::Configuration(_)));
    }

    #[test]
    fn test_get_decrypted_passphrase() {
        let service = seeded_service();
        let err = service.get_decrypted_passphrase().unwrap_err();
        assert!(matches!(err, BackupError::Configuration(_)));

        service.save_encryption_config("first-passphrase").unwrap();
        service.save_encryption_config("second-passphrase").unwrap();
        assert_eq!(
            service.get_decrypted_passphrase().unwrap().as_str(),
            "second-passphrase"
        );

        let status = service.encryption_status().unwrap().unwrap();
        assert!(status.enabled);
        assert!(status.last_rotated_at.is_some());
    }

    #[test]
    fn test_disable_encryption() {
        let service = seeded_service();
        assert!(!service.disable_encryption().unwrap());

        service.save_encryption_config("stored-passphrase").unwrap();
        assert!(service.disable_encryption().unwrap());

        assert!(!service.is_encrypted(&service.export().unwrap()));
        assert!(service.get_decrypted_passphrase().is_err());
        assert!(service.encryption_status().unwrap().unwrap().created_at.is_some());
    }

    #[test]
    fn test_metadata_read_does_not_touch_table_data() {
        let service = seeded_service();
        let archive = service.export().unwrap();
        let metadata = archive::read_metadata(&archive).unwrap();

        // Valid metadata block followed by 100 MiB that is not table data
        let json = serde_json::to_vec(&metadata).unwrap();
        let mut huge = (json.len() as u32).to_be_bytes().to_vec();
        huge.extend_from_slice(&json);
        huge.resize(huge.len() + 100 * 1024 * 1024, 0xA5);

        let started = Instant::now();
        let read = service.get_metadata(&huge, None).unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(read, metadata);
    }

    #[test]
    fn test_inspect_counts_rows() {
        let service = seeded_service();
        let archive = service.export().unwrap();

        let inspection = service.inspect(&archive, None).unwrap();
        assert!(!inspection.encrypted);
        let users = inspection
            .row_counts
            .iter()
            .find(|(t, _)| t == "users")
            .map(|(_, n)| *n);
        assert_eq!(users, Some(8));
    }

    #[test]
    fn test_cancelled_export() {
        let service = seeded_service();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = service.export_with(None, &cancel).unwrap_err();
        assert!(matches!(err, BackupError::Cancelled));
    }

    #[test]
    fn test_empty_passphrase_is_rejected() {
        let service = seeded_service();
        assert!(matches!(
            service.export_with_passphrase("").unwrap_err(),
            BackupError::Validation(_)
        ));
        assert!(matches!(
            service.save_encryption_config("").unwrap_err(),
            BackupError::Validation(_)
        ));
    }
}
