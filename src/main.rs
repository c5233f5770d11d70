use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tgadmin_backup::cli::{
    handle_backup_command, handle_encrypt_command, BackupCommands, CliContext, EncryptCommands,
};
use tgadmin_backup::crypto::HostKeyProtector;
use tgadmin_backup::storage::Database;

/// Environment variable holding a tracing filter (e.g. `debug`)
const LOG_ENV: &str = "TGA_BACKUP_LOG";

#[derive(Parser)]
#[command(
    name = "tga-backup",
    author = "Kaylee Beyene",
    version,
    about = "Full-system backup and restore for the group administration database",
    long_about = "tga-backup exports every application table into a single compressed, \
                  optionally passphrase-encrypted archive and restores it atomically. \
                  Protected fields are re-encrypted for the host they are restored on."
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory, settings, host key and database
    Init,

    /// Show current configuration and paths
    Config,

    #[command(flatten)]
    Backup(BackupCommands),

    /// Backup encryption commands
    #[command(subcommand)]
    Encrypt(EncryptCommands),
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let ctx = CliContext::load()?;

    match cli.command {
        Some(Commands::Init) => {
            println!("Initializing tga-backup at: {}", ctx.paths.base_dir().display());
            ctx.paths.ensure_directories()?;
            ctx.settings.save(&ctx.paths)?;
            HostKeyProtector::load_or_create(&ctx.paths.host_key_file())?;
            let db_file = ctx.settings.database_file(&ctx.paths);
            Database::open(&db_file)?;
            println!("Initialization complete!");
            println!();
            println!("Database:   {}", db_file.display());
            println!("Backups:    {}", ctx.settings.backup_dir(&ctx.paths).display());
            println!("Host key:   {}", ctx.paths.host_key_file().display());
            println!();
            println!("Run 'tga-backup export' to create your first backup.");
        }
        Some(Commands::Config) => {
            let settings = &ctx.settings;
            let retention = &settings.retention;
            println!("tga-backup Configuration");
            println!("========================");
            println!("Base directory:   {}", ctx.paths.base_dir().display());
            println!("Settings file:    {}", ctx.paths.settings_file().display());
            println!("Database file:    {}", settings.database_file(&ctx.paths).display());
            println!("Backup directory: {}", settings.backup_dir(&ctx.paths).display());
            println!("Host key file:    {}", ctx.paths.host_key_file().display());
            println!();
            println!("Settings:");
            println!("  Batch size:          {}", settings.batch_size);
            println!("  Compression level:   {}", settings.compression_level);
            println!("  Rotate after export: {}", settings.rotate_after_export);
            println!(
                "  Retention:           {} hourly, {} daily, {} weekly, {} monthly, {} yearly",
                retention.hourly,
                retention.daily,
                retention.weekly,
                retention.monthly,
                retention.yearly
            );
        }
        Some(Commands::Backup(cmd)) => handle_backup_command(&ctx, cmd)?,
        Some(Commands::Encrypt(cmd)) => handle_encrypt_command(&ctx, cmd)?,
        None => {
            println!("tga-backup - Full-system backup and restore");
            println!();
            println!("Run 'tga-backup --help' for usage information.");
            println!("Run 'tga-backup init' to get started.");
        }
    }

    Ok(())
}
