//! Configuration for the backup tool
//!
//! - Data directory resolution (env override, then XDG / APPDATA)
//! - JSON settings: database location, backup directory, retention

pub mod paths;
pub mod settings;

pub use paths::BackupPaths;
pub use settings::Settings;
