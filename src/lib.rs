//! tgadmin-backup - Full-system backup and restore engine
//!
//! This library exports every application table of the group administration
//! database into a single versioned archive and restores it atomically.
//! Archives are gzip-compressed and optionally encrypted with a passphrase
//! (PBKDF2-HMAC-SHA256 and AES-256-GCM). Host-protected fields such as bot
//! tokens and TOTP secrets travel in plaintext inside the archive and are
//! re-protected for the target host on restore.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Configuration and path management
//! - `error`: Custom error types
//! - `crypto`: Archive encryption and host-scoped field protection
//! - `schema`: Table catalog and column mappings
//! - `storage`: SQLite database, migrations and file helpers
//! - `backup`: Export, archive codec, restore engine and retention
//! - `cli`: Command handlers for the `tga-backup` binary
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tgadmin_backup::{BackupService, Database, HostKeyProtector};
//!
//! let db = Arc::new(Database::open("tgadmin.db")?);
//! let protector = Arc::new(HostKeyProtector::load_or_create("host.key".as_ref())?);
//! let service = BackupService::new(db, protector);
//!
//! let archive = service.export_with_passphrase("correct horse battery staple")?;
//! let report = service.restore_with_passphrase(&archive, "correct horse battery staple")?;
//! println!("{}", report.summary());
//! ```

pub mod backup;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod schema;
pub mod storage;

#[cfg(test)]
pub mod testing;

pub use backup::{BackupManager, BackupService, RestoreReport, RetentionConfig};
pub use cancel::CancellationToken;
pub use crypto::{DataProtector, HostKeyProtector};
pub use error::{BackupError, BackupResult};
pub use storage::Database;
