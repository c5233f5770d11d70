//! Backup CLI commands
//!
//! Export, restore, inspect and rotate full-system backups.

use std::borrow::Cow;
use std::path::PathBuf;

use clap::Subcommand;

use super::{prompt_passphrase, CliContext};
use crate::backup::{read_backup, BackupFileInfo, BackupService};
use crate::cancel::CancellationToken;
use crate::crypto::SecureString;
use crate::error::BackupResult;
use crate::storage::write_bytes_atomic;

/// Backup subcommands
#[derive(Subcommand)]
pub enum BackupCommands {
    /// Export the whole database to a new backup file
    Export {
        /// Encrypt with this passphrase instead of the configured one
        #[arg(short, long, env = "TGA_BACKUP_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<String>,

        /// Write the archive here instead of the backup directory
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Skip retention rotation after writing
        #[arg(long)]
        no_rotate: bool,
    },

    /// Replace ALL current data with the contents of a backup
    Restore {
        /// Backup filename or path (use 'latest' for most recent)
        backup: String,

        /// Passphrase for an encrypted backup
        #[arg(short, long, env = "TGA_BACKUP_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<String>,

        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Show information about a specific backup
    Info {
        /// Backup filename or path (use 'latest' for most recent)
        backup: String,

        /// Passphrase for an encrypted backup
        #[arg(short, long, env = "TGA_BACKUP_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<String>,

        /// Decode the archive and count rows per table
        #[arg(long)]
        rows: bool,
    },

    /// List all available backups
    List {
        /// Show detailed information
        #[arg(short, long)]
        verbose: bool,
    },

    /// Delete backups no retention tier keeps
    Prune {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

/// Handle a backup command
pub fn handle_backup_command(ctx: &CliContext, cmd: BackupCommands) -> BackupResult<()> {
    match cmd {
        BackupCommands::Export {
            passphrase,
            output,
            no_rotate,
        } => export(ctx, passphrase, output, no_rotate),
        BackupCommands::Restore {
            backup,
            passphrase,
            force,
        } => restore(ctx, &backup, passphrase, force),
        BackupCommands::Info {
            backup,
            passphrase,
            rows,
        } => info(ctx, &backup, passphrase, rows),
        BackupCommands::List { verbose } => list(ctx, verbose),
        BackupCommands::Prune { force } => prune(ctx, force),
    }
}

fn export(
    ctx: &CliContext,
    passphrase: Option<String>,
    output: Option<PathBuf>,
    no_rotate: bool,
) -> BackupResult<()> {
    let service = ctx.open_service()?;
    let passphrase = match passphrase {
        Some(p) => Some(SecureString::from(p)),
        None => configured_passphrase(&service)?,
    };

    println!("Exporting database...");
    let (archive, stats) =
        service.export_with(passphrase.as_deref(), &CancellationToken::new())?;

    let managed = output.is_none();
    let path = match output {
        Some(path) => {
            write_bytes_atomic(&path, &archive)?;
            path
        }
        None => ctx.manager().write_backup(&archive)?.path,
    };

    println!("Backup created: {}", path.display());
    println!(
        "Exported {} rows from {} tables ({}, {})",
        stats.total_rows(),
        stats.tables.len(),
        format_size(stats.archive_bytes as u64),
        if stats.encrypted { "encrypted" } else { "not encrypted" },
    );
    if stats.passed_through() > 0 {
        println!(
            "Warning: {} protected field(s) could not be decrypted and were exported as stored.",
            stats.passed_through()
        );
    }

    if managed && ctx.settings.rotate_after_export && !no_rotate {
        let deleted = ctx.manager().rotate()?;
        if !deleted.is_empty() {
            println!("Rotated {} old backup(s).", deleted.len());
        }
    }

    Ok(())
}

fn restore(
    ctx: &CliContext,
    backup: &str,
    passphrase: Option<String>,
    force: bool,
) -> BackupResult<()> {
    let manager = ctx.manager();
    let backup_path = manager.resolve(backup)?;
    let archive = read_backup(&backup_path)?;

    let service = ctx.open_service()?;
    let plain = plain_archive(&service, &archive, passphrase)?;
    let metadata = service.get_metadata(&plain, None)?;

    println!("Backup Information");
    println!("==================");
    println!("File: {}", backup_path.display());
    print_created(metadata.created_at_utc());
    println!("Format version: {}", metadata.version);
    println!("Tables: {}", metadata.table_count);
    println!();

    if !force {
        println!("WARNING: This will overwrite ALL current data!");
        println!("To proceed, run again with --force flag:");
        println!("  tga-backup restore {} --force", backup);
        return Ok(());
    }

    println!("Creating backup of current data before restore...");
    let safety_passphrase = configured_passphrase(&service)?;
    let (current, _) =
        service.export_with(safety_passphrase.as_deref(), &CancellationToken::new())?;
    let pre_restore = manager.write_backup(&current)?;
    println!("Pre-restore backup saved: {}", pre_restore.filename());
    println!();

    println!("Restoring from backup...");
    let report = service.restore_with(&plain, None, &CancellationToken::new())?;

    println!("Restore complete!");
    println!("{}", report.summary());
    if !report.self_referencing.is_empty() {
        println!(
            "Self-referencing tables: {}",
            report.self_referencing.join(", ")
        );
    }

    Ok(())
}

fn info(
    ctx: &CliContext,
    backup: &str,
    passphrase: Option<String>,
    rows: bool,
) -> BackupResult<()> {
    let backup_path = ctx.manager().resolve(backup)?;
    let archive = read_backup(&backup_path)?;

    let service = ctx.open_service()?;
    let plain = plain_archive(&service, &archive, passphrase)?;

    println!("Backup Details");
    println!("==============");
    println!("File: {}", backup_path.display());
    println!("Size: {}", format_size(archive.len() as u64));
    println!(
        "Encrypted: {}",
        if service.is_encrypted(&archive) { "Yes" } else { "No" }
    );

    if rows {
        let inspection = service.inspect(&plain, None)?;
        let metadata = &inspection.metadata;
        print_created(metadata.created_at_utc());
        println!("Format version: {}", metadata.version);
        println!("App version: {}", metadata.app_version);
        println!();
        println!("Tables:");
        let width = inspection
            .row_counts
            .iter()
            .map(|(name, _)| name.len())
            .max()
            .unwrap_or(0);
        for (name, count) in &inspection.row_counts {
            println!("  {:<width$}  {:>8}", name, count, width = width);
        }
        let total: u64 = inspection.row_counts.iter().map(|(_, c)| c).sum();
        println!();
        println!("Total rows: {}", total);
    } else {
        let metadata = service.get_metadata(&plain, None)?;
        print_created(metadata.created_at_utc());
        println!("Format version: {}", metadata.version);
        println!("App version: {}", metadata.app_version);
        println!();
        println!("Tables ({}): {}", metadata.table_count, metadata.tables.join(", "));
    }

    Ok(())
}

fn list(ctx: &CliContext, verbose: bool) -> BackupResult<()> {
    let backups = ctx.manager().list_backups()?;

    if backups.is_empty() {
        println!("No backups found.");
        println!("Create one with: tga-backup export");
        return Ok(());
    }

    println!("Available Backups");
    println!("=================");
    println!();

    for (i, backup) in backups.iter().enumerate() {
        let age = format_duration(chrono::Utc::now().signed_duration_since(backup.created_at));
        let marker = encrypted_marker(backup);

        if verbose {
            println!(
                "{}. {}{}\n   Created: {}\n   Size: {}\n   Age: {}\n",
                i + 1,
                backup.filename(),
                marker,
                backup.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                format_size(backup.size_bytes),
                age,
            );
        } else {
            println!(
                "  {}. {} ({} ago, {}){}",
                i + 1,
                backup.filename(),
                age,
                format_size(backup.size_bytes),
                marker,
            );
        }
    }

    println!();
    println!("Total: {} backup(s)", backups.len());
    Ok(())
}

fn prune(ctx: &CliContext, force: bool) -> BackupResult<()> {
    let manager = ctx.manager();
    let plan = manager.preview_rotation()?;
    let retention = manager.retention();
    let policy = format!(
        "{} hourly, {} daily, {} weekly, {} monthly, {} yearly",
        retention.hourly, retention.daily, retention.weekly, retention.monthly, retention.yearly
    );

    if plan.delete.is_empty() {
        println!("No backups to prune.");
        println!("Current retention policy: {}", policy);
        println!("You have {} backup(s).", plan.keep.len());
        return Ok(());
    }

    println!("Prune Summary");
    println!("=============");
    println!("Retention policy: {}", policy);
    println!(
        "Keeping {} backup(s), deleting {}",
        plan.keep.len(),
        plan.delete.len()
    );
    println!();
    for backup in &plan.delete {
        println!("  - {}", backup.filename());
    }
    println!();

    if !force {
        println!("To delete old backups, run again with --force flag:");
        println!("  tga-backup prune --force");
        return Ok(());
    }

    let deleted = manager.rotate()?;
    println!("Deleted {} backup(s).", deleted.len());
    Ok(())
}

/// Stored passphrase when encryption is enabled
fn configured_passphrase(service: &BackupService) -> BackupResult<Option<SecureString>> {
    match service.encryption_status()? {
        Some(config) if config.enabled => service.get_decrypted_passphrase().map(Some),
        _ => Ok(None),
    }
}

/// Decrypt `archive` once, trying the given passphrase, then the stored one,
/// then a prompt
fn plain_archive<'a>(
    service: &BackupService,
    archive: &'a [u8],
    given: Option<String>,
) -> BackupResult<Cow<'a, [u8]>> {
    if !service.is_encrypted(archive) {
        return Ok(Cow::Borrowed(archive));
    }

    if let Some(given) = given {
        let given = SecureString::from(given);
        return service.open_archive(archive, Some(given.as_str()));
    }

    if let Ok(stored) = service.get_decrypted_passphrase() {
        if let Ok(plain) = service.open_archive(archive, Some(stored.as_str())) {
            return Ok(plain);
        }
    }

    let entered = prompt_passphrase("Backup passphrase: ")?;
    service.open_archive(archive, Some(entered.as_str()))
}

fn print_created(created_at: Option<chrono::DateTime<chrono::Utc>>) {
    match created_at {
        Some(ts) => println!("Created: {}", ts.format("%Y-%m-%d %H:%M:%S UTC")),
        None => println!("Created: unknown"),
    }
}

fn encrypted_marker(backup: &BackupFileInfo) -> &'static str {
    if backup.is_encrypted {
        " [encrypted]"
    } else {
        ""
    }
}

/// Format a duration in human-readable form
fn format_duration(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);

    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }

    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }

    let days = hours / 24;
    if days < 30 {
        return format!("{}d", days);
    }

    format!("{}mo", days / 30)
}

/// Format a file size in human-readable form
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use crate::testing;
    use std::sync::Arc;

    fn empty_service() -> BackupService {
        let db = Arc::new(Database::open_in_memory().unwrap());
        BackupService::new(db, testing::protector())
    }

    #[test]
    fn test_plain_archive_borrows_unencrypted_bytes() {
        let service = empty_service();
        let archive = service.export().unwrap();

        let plain = plain_archive(&service, &archive, None).unwrap();
        assert!(matches!(plain, Cow::Borrowed(_)));
    }

    #[test]
    fn test_plain_archive_decrypts_with_given_passphrase() {
        let service = empty_service();
        let archive = service.export_with_passphrase("correct horse").unwrap();

        let plain = plain_archive(&service, &archive, Some("correct horse".into())).unwrap();
        assert!(!service.is_encrypted(&plain));
        assert_eq!(service.get_metadata(&plain, None).unwrap().version, "2.0");
        assert!(service.inspect(&plain, None).is_ok());
    }

    #[test]
    fn test_plain_archive_rejects_wrong_passphrase() {
        let service = empty_service();
        let archive = service.export_with_passphrase("correct horse").unwrap();

        let err = plain_archive(&service, &archive, Some("wrong".into())).unwrap_err();
        assert!(err.is_crypto());
    }

    #[test]
    fn test_plain_archive_falls_back_to_stored_passphrase() {
        let service = empty_service();
        service.save_encryption_config("stored passphrase").unwrap();
        let archive = service.export().unwrap();
        assert!(service.is_encrypted(&archive));

        let plain = plain_archive(&service, &archive, None).unwrap();
        assert!(service.restore_with(&plain, None, &CancellationToken::new()).is_ok());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(chrono::Duration::seconds(42)), "42s");
        assert_eq!(format_duration(chrono::Duration::minutes(5)), "5m");
        assert_eq!(format_duration(chrono::Duration::hours(3)), "3h");
        assert_eq!(format_duration(chrono::Duration::days(2)), "2d");
        assert_eq!(format_duration(chrono::Duration::days(65)), "2mo");
        assert_eq!(format_duration(chrono::Duration::seconds(-3)), "0s");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024 / 2), "1.5 MB");
    }
}
