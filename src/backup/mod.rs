//! Full-system backup and restore
//!
//! # Architecture
//!
//! - [`BackupService`]: the facade; export, restore, metadata and
//!   passphrase settings
//! - [`TableExporter`]: streams one table into an archive
//! - [`archive`]: the archive codec (metadata block + compressed rows)
//! - [`DependencyResolver`]: foreign-key load order
//! - [`RestoreEngine`]: transactional wipe, load and sequence reset
//! - [`FieldProtectionBridge`]: moves protected columns between hosts
//! - [`BackupManager`] / [`RetentionManager`]: backup files on disk and
//!   grandfather-father-son rotation
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tgadmin_backup::backup::{BackupManager, BackupService};
//! use tgadmin_backup::crypto::HostKeyProtector;
//! use tgadmin_backup::storage::Database;
//!
//! let db = Arc::new(Database::open(paths.database_file())?);
//! let protector = Arc::new(HostKeyProtector::load_or_create(&paths.host_key_file())?);
//! let service = BackupService::new(db, protector);
//!
//! let archive = service.export()?;
//! let manager = BackupManager::new(paths.backup_dir(), settings.retention);
//! let (info, _deleted) = manager.write_backup_with_retention(&archive)?;
//!
//! // Later, on any host
//! let report = service.restore_with_passphrase(&archive, "passphrase")?;
//! println!("{}", report.summary());
//! ```

pub mod archive;
mod dependency;
mod exporter;
mod field_protection;
mod manager;
mod restore;
mod retention;
mod service;

pub use archive::{ArchiveMetadata, ArchiveReader, ArchiveWriter, TableSnapshot, FORMAT_VERSION};
pub use dependency::{edges_from_database, DependencyEdge, DependencyResolver, LoadOrder};
pub use exporter::{TableExportStats, TableExporter};
pub use field_protection::{ExportedValue, FieldProtectionBridge};
pub use manager::{
    backup_filename, parse_backup_timestamp, read_backup, BackupManager, BACKUP_EXTENSION,
};
pub use restore::{
    RestoreEngine, RestorePhase, RestoreReport, TableRestoreStats, DEFAULT_BATCH_SIZE,
};
pub use retention::{
    BackupFileInfo, RetentionConfig, RetentionManager, RetentionPlan, RetentionTier,
};
pub use service::{ArchiveInspection, BackupOptions, BackupService, ExportStats};
