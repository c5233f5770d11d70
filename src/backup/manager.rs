//! Backup directory management
//!
//! Archives are written as `backup_YYYYMMDD-HHMMSS-mmm.tgabak` files; the
//! creation time is parsed back from the filename, so listing a directory
//! never opens more than the first few bytes of each file.

use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tracing::{info, warn};

use crate::crypto::{self, MAGIC_HEADER};
use crate::error::{BackupError, BackupResult};
use crate::storage::write_bytes_atomic;

use super::retention::{BackupFileInfo, RetentionConfig, RetentionManager, RetentionPlan};

/// Extension of archive files
pub const BACKUP_EXTENSION: &str = "tgabak";

const FILENAME_PREFIX: &str = "backup_";

/// Manages backup files and retention
pub struct BackupManager {
    backup_dir: PathBuf,
    retention: RetentionConfig,
}

impl BackupManager {
    pub fn new(backup_dir: impl Into<PathBuf>, retention: RetentionConfig) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            retention,
        }
    }

    /// Write an archive to a new timestamped file
    pub fn write_backup(&self, archive: &[u8]) -> BackupResult<BackupFileInfo> {
        self.write_backup_at(archive, Utc::now())
    }

    /// Write an archive as if created at `created_at`
    pub fn write_backup_at(
        &self,
        archive: &[u8],
        created_at: DateTime<Utc>,
    ) -> BackupResult<BackupFileInfo> {
        fs::create_dir_all(&self.backup_dir).map_err(|e| {
            BackupError::Io(format!("Failed to create backup directory: {}", e))
        })?;

        // Filenames carry milliseconds; step past any file already using one
        let mut created_at = created_at;
        let mut path = self.backup_dir.join(backup_filename(&created_at));
        while path.exists() {
            created_at += Duration::milliseconds(1);
            path = self.backup_dir.join(backup_filename(&created_at));
        }

        write_bytes_atomic(&path, archive)?;
        info!(path = %path.display(), bytes = archive.len(), "Wrote backup");

        Ok(BackupFileInfo {
            path,
            created_at,
            size_bytes: archive.len() as u64,
            is_encrypted: crypto::is_encrypted(archive),
        })
    }

    /// List all backups, newest first
    pub fn list_backups(&self) -> BackupResult<Vec<BackupFileInfo>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();

        for entry in fs::read_dir(&self.backup_dir).map_err(|e| {
            BackupError::Io(format!("Failed to read backup directory: {}", e))
        })? {
            let entry = entry.map_err(|e| {
                BackupError::Io(format!("Failed to read directory entry: {}", e))
            })?;

            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == BACKUP_EXTENSION) {
                if let Some(info) = parse_backup_info(&path) {
                    backups.push(info);
                }
            }
        }

        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(backups)
    }

    /// Files the retention config would delete, without deleting them
    pub fn preview_rotation(&self) -> BackupResult<RetentionPlan> {
        let backups = self.list_backups()?;
        Ok(RetentionManager::new(self.retention).plan(&backups))
    }

    /// Delete every backup the retention config does not keep
    #[tracing::instrument(skip(self), fields(dir = %self.backup_dir.display()))]
    pub fn rotate(&self) -> BackupResult<Vec<PathBuf>> {
        let backups = self.list_backups()?;
        let doomed = RetentionManager::new(self.retention).select_for_deletion(&backups);

        let mut deleted = Vec::with_capacity(doomed.len());
        for backup in doomed {
            fs::remove_file(&backup.path).map_err(|e| {
                BackupError::Io(format!(
                    "Failed to delete old backup {}: {}",
                    backup.path.display(),
                    e
                ))
            })?;
            deleted.push(backup.path);
        }

        if !deleted.is_empty() {
            info!(deleted = deleted.len(), kept = backups.len() - deleted.len(), "Rotated backups");
        }
        Ok(deleted)
    }

    /// Write an archive, then rotate
    pub fn write_backup_with_retention(
        &self,
        archive: &[u8],
    ) -> BackupResult<(BackupFileInfo, Vec<PathBuf>)> {
        let info = self.write_backup(archive)?;
        let deleted = self.rotate()?;
        Ok((info, deleted))
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn retention(&self) -> &RetentionConfig {
        &self.retention
    }

    /// Get the most recent backup
    pub fn get_latest_backup(&self) -> BackupResult<Option<BackupFileInfo>> {
        let backups = self.list_backups()?;
        Ok(backups.into_iter().next())
    }

    /// Resolve `latest`, a filename in the backup directory, or a path
    pub fn resolve(&self, name: &str) -> BackupResult<PathBuf> {
        if name == "latest" {
            return self
                .get_latest_backup()?
                .map(|b| b.path)
                .ok_or_else(|| BackupError::backup_not_found("latest"));
        }

        let direct = PathBuf::from(name);
        if direct.is_file() {
            return Ok(direct);
        }

        let in_dir = self.backup_dir.join(name);
        if in_dir.is_file() {
            return Ok(in_dir);
        }

        Err(BackupError::backup_not_found(name))
    }
}

/// Read a whole archive file
pub fn read_backup(path: &Path) -> BackupResult<Vec<u8>> {
    fs::read(path).map_err(|e| {
        BackupError::Io(format!("Failed to read backup file {}: {}", path.display(), e))
    })
}

/// Filename for a backup created at `created_at`
pub fn backup_filename(created_at: &DateTime<Utc>) -> String {
    format!(
        "{}{}-{:03}.{}",
        FILENAME_PREFIX,
        created_at.format("%Y%m%d-%H%M%S"),
        created_at.timestamp_subsec_millis(),
        BACKUP_EXTENSION
    )
}

fn parse_backup_info(path: &Path) -> Option<BackupFileInfo> {
    let filename = path.file_name()?.to_string_lossy().to_string();
    let date_part = filename
        .strip_prefix(FILENAME_PREFIX)?
        .strip_suffix(&format!(".{}", BACKUP_EXTENSION))?;
    let created_at = parse_backup_timestamp(date_part)?;

    let metadata = fs::metadata(path).ok()?;

    Some(BackupFileInfo {
        path: path.to_path_buf(),
        created_at,
        size_bytes: metadata.len(),
        is_encrypted: has_magic_header(path),
    })
}

fn has_magic_header(path: &Path) -> bool {
    let mut prefix = [0u8; MAGIC_HEADER.len()];
    match File::open(path).and_then(|mut f| f.read_exact(&mut prefix)) {
        Ok(()) => crypto::is_encrypted(&prefix),
        Err(e) => {
            if e.kind() != std::io::ErrorKind::UnexpectedEof {
                warn!(path = %path.display(), error = %e, "Could not read backup header");
            }
            false
        }
    }
}

/// Parse a backup timestamp from the filename date part
///
/// Accepts `YYYYMMDD-HHMMSS` and `YYYYMMDD-HHMMSS-mmm`.
pub fn parse_backup_timestamp(date_str: &str) -> Option<DateTime<Utc>> {
    let parts: Vec<&str> = date_str.split('-').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }

    let date_part = parts[0];
    let time_part = parts[1];
    let millis: u32 = match parts.get(2) {
        Some(ms) => ms.parse().ok()?,
        None => 0,
    };

    if date_part.len() != 8 || time_part.len() != 6 {
        return None;
    }

    let year: i32 = date_part[0..4].parse().ok()?;
    let month: u32 = date_part[4..6].parse().ok()?;
    let day: u32 = date_part[6..8].parse().ok()?;
    let hour: u32 = time_part[0..2].parse().ok()?;
    let minute: u32 = time_part[2..4].parse().ok()?;
    let second: u32 = time_part[4..6].parse().ok()?;

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_milli_opt(hour, minute, second, millis)?;

    Some(DateTime::from_naive_utc_and_offset(
        NaiveDateTime::new(date, time),
        Utc,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};
    use tempfile::TempDir;

    fn create_test_manager(retention: RetentionConfig) -> (BackupManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let manager = BackupManager::new(temp_dir.path().join("backups"), retention);
        (manager, temp_dir)
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, day, 3, 0, 0).unwrap()
    }

    #[test]
    fn test_write_backup() {
        let (manager, _temp) = create_test_manager(RetentionConfig::default());

        let info = manager.write_backup_at(b"plain", at(1)).unwrap();
        assert!(info.path.exists());
        assert_eq!(info.filename(), "backup_20260101-030000-000.tgabak");
        assert!(!info.is_encrypted);
    }

    #[test]
    fn test_same_millisecond_gets_distinct_files() {
        let (manager, _temp) = create_test_manager(RetentionConfig::default());

        let first = manager.write_backup_at(b"one", at(1)).unwrap();
        let second = manager.write_backup_at(b"two", at(1)).unwrap();
        assert_ne!(first.path, second.path);
        assert_eq!(manager.list_backups().unwrap().len(), 2);
    }

    #[test]
    fn test_list_backups_newest_first_and_detects_encryption() {
        let (manager, _temp) = create_test_manager(RetentionConfig::default());

        manager.write_backup_at(b"plain archive", at(1)).unwrap();
        let mut encrypted = MAGIC_HEADER.to_vec();
        encrypted.extend_from_slice(&[0u8; 64]);
        manager.write_backup_at(&encrypted, at(2)).unwrap();
        fs::write(manager.backup_dir().join("notes.txt"), "ignored").unwrap();

        let backups = manager.list_backups().unwrap();
        assert_eq!(backups.len(), 2);
        assert_eq!(backups[0].created_at, at(2));
        assert!(backups[0].is_encrypted);
        assert!(!backups[1].is_encrypted);
    }

    #[test]
    fn test_rotate_applies_retention() {
        let retention = RetentionConfig {
            hourly: 0,
            daily: 7,
            weekly: 4,
            monthly: 1,
            yearly: 0,
        };
        let (manager, _temp) = create_test_manager(retention);

        for day in 1..=30 {
            manager.write_backup_at(b"archive", at(day)).unwrap();
        }

        let preview = manager.preview_rotation().unwrap();
        assert_eq!(preview.delete.len(), 19);

        let deleted = manager.rotate().unwrap();
        assert_eq!(deleted.len(), 19);
        assert_eq!(manager.list_backups().unwrap().len(), 11);
    }

    #[test]
    fn test_resolve() {
        let (manager, _temp) = create_test_manager(RetentionConfig::default());
        assert!(manager.resolve("latest").unwrap_err().is_not_found());

        manager.write_backup_at(b"old", at(1)).unwrap();
        let newest = manager.write_backup_at(b"new", at(2)).unwrap();

        assert_eq!(manager.resolve("latest").unwrap(), newest.path);
        assert_eq!(manager.resolve(&newest.filename()).unwrap(), newest.path);
        assert_eq!(
            manager.resolve(newest.path.to_str().unwrap()).unwrap(),
            newest.path
        );
        assert!(manager.resolve("backup_nope.tgabak").unwrap_err().is_not_found());
    }

    #[test]
    fn test_get_latest_backup() {
        let (manager, _temp) = create_test_manager(RetentionConfig::default());
        assert!(manager.get_latest_backup().unwrap().is_none());

        let info = manager.write_backup(b"archive").unwrap();
        let latest = manager.get_latest_backup().unwrap().unwrap();
        assert_eq!(latest.path, info.path);
        assert_eq!(read_backup(&latest.path).unwrap(), b"archive");
    }

    #[test]
    fn test_parse_backup_timestamp() {
        let timestamp = parse_backup_timestamp("20251127-143022").unwrap();
        assert_eq!(timestamp.year(), 2025);
        assert_eq!(timestamp.month(), 11);
        assert_eq!(timestamp.day(), 27);

        let timestamp = parse_backup_timestamp("20251127-143022-456").unwrap();
        assert_eq!(timestamp.hour(), 14);
        assert_eq!(timestamp.timestamp_subsec_millis(), 456);

        assert!(parse_backup_timestamp("2025-11-27").is_none());
        assert!(parse_backup_timestamp("20251327-143022").is_none());
    }

    #[test]
    fn test_empty_backup_dir() {
        let (manager, _temp) = create_test_manager(RetentionConfig::default());
        assert!(manager.list_backups().unwrap().is_empty());
        assert!(manager.rotate().unwrap().is_empty());
    }
}
