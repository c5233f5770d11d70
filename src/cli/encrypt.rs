//! Encryption CLI commands
//!
//! Enables, disables and reports on backup archive encryption. The
//! passphrase is stored in the configs table, protected with the host key.

use clap::Subcommand;

use super::{prompt_new_passphrase, CliContext};
use crate::crypto::{SecureString, PBKDF2_ITERATIONS};
use crate::error::BackupResult;

/// Encryption management commands
#[derive(Subcommand)]
pub enum EncryptCommands {
    /// Encrypt future backups with a passphrase
    Enable {
        /// Passphrase to store (prompted for when omitted)
        #[arg(short, long, env = "TGA_BACKUP_PASSPHRASE", hide_env_values = true)]
        passphrase: Option<String>,

        /// Replace an already configured passphrase
        #[arg(short, long)]
        force: bool,
    },

    /// Stop encrypting backups and forget the stored passphrase
    Disable {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Show encryption status
    Status,

    /// Print the stored passphrase
    Show {
        /// Confirm printing the passphrase to the terminal
        #[arg(short, long)]
        force: bool,
    },
}

/// Handle encryption commands
pub fn handle_encrypt_command(ctx: &CliContext, cmd: EncryptCommands) -> BackupResult<()> {
    match cmd {
        EncryptCommands::Enable { passphrase, force } => enable_encryption(ctx, passphrase, force),
        EncryptCommands::Disable { force } => disable_encryption(ctx, force),
        EncryptCommands::Status => show_status(ctx),
        EncryptCommands::Show { force } => show_passphrase(ctx, force),
    }
}

fn enable_encryption(
    ctx: &CliContext,
    passphrase: Option<String>,
    force: bool,
) -> BackupResult<()> {
    let service = ctx.open_service()?;
    let already_enabled = service
        .encryption_status()?
        .map_or(false, |config| config.enabled);

    if already_enabled && !force {
        println!("Encryption is already enabled.");
        println!("To replace the passphrase, run again with --force flag:");
        println!("  tga-backup encrypt enable --force");
        return Ok(());
    }

    let passphrase = match passphrase {
        Some(p) => SecureString::from(p),
        None => {
            println!("Enable Encryption");
            println!("=================");
            println!();
            println!("Backups will be encrypted with AES-256-GCM.");
            println!(
                "IMPORTANT: If you lose the passphrase, encrypted backups cannot be recovered!"
            );
            println!();
            prompt_new_passphrase()?
        }
    };

    service.save_encryption_config(&passphrase)?;

    if already_enabled {
        println!("Backup passphrase replaced.");
        println!("Existing backups still need the previous passphrase.");
    } else {
        println!("Encryption enabled successfully!");
        println!("New backups will be encrypted with the stored passphrase.");
    }
    Ok(())
}

fn disable_encryption(ctx: &CliContext, force: bool) -> BackupResult<()> {
    let service = ctx.open_service()?;
    let enabled = service
        .encryption_status()?
        .map_or(false, |config| config.enabled);

    if !enabled {
        println!("Encryption is not enabled.");
        return Ok(());
    }

    if !force {
        println!("WARNING: The stored passphrase will be forgotten.");
        println!("Encrypted backups will still need it to be restored.");
        println!("To proceed, run again with --force flag:");
        println!("  tga-backup encrypt disable --force");
        return Ok(());
    }

    service.disable_encryption()?;
    println!("Encryption disabled successfully!");
    println!("New backups will be stored unencrypted.");
    Ok(())
}

fn show_status(ctx: &CliContext) -> BackupResult<()> {
    let service = ctx.open_service()?;

    println!("Encryption Status");
    println!("=================");
    println!();

    match service.encryption_status()? {
        Some(config) if config.enabled => {
            println!("Status: ENABLED");
            println!();
            println!("Algorithm: {}", config.algorithm);
            println!("Key derivation: PBKDF2-HMAC-SHA256, {} iterations", config.iterations);
            if let Some(created) = config.created_at {
                println!("Enabled: {}", created.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            if let Some(rotated) = config.last_rotated_at {
                println!("Last rotated: {}", rotated.format("%Y-%m-%d %H:%M:%S UTC"));
            }
        }
        _ => {
            println!("Status: DISABLED");
            println!();
            println!("Backups are stored unencrypted.");
            println!("Run 'tga-backup encrypt enable' to enable encryption.");
            println!(
                "Archives are encrypted with AES-256-GCM (PBKDF2-HMAC-SHA256, {} iterations).",
                PBKDF2_ITERATIONS
            );
        }
    }

    Ok(())
}

fn show_passphrase(ctx: &CliContext, force: bool) -> BackupResult<()> {
    if !force {
        println!("This prints the backup passphrase in plain text.");
        println!("To proceed, run again with --force flag:");
        println!("  tga-backup encrypt show --force");
        return Ok(());
    }

    let passphrase = ctx.open_service()?.get_decrypted_passphrase()?;
    println!("{}", passphrase.as_str());
    Ok(())
}
