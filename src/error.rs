//! Custom error types for the backup engine
//!
//! This module defines the error hierarchy for backup, restore and retention
//! operations using thiserror for ergonomic error definitions.

use thiserror::Error;

/// The main error type for backup engine operations
#[derive(Error, Debug)]
pub enum BackupError {
    /// Wrong passphrase or corrupted ciphertext (authentication tag mismatch)
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Malformed archive structure or unsupported archive version
    #[error("Archive format error: {0}")]
    Format(String),

    /// The foreign-key graph contains a cycle between distinct tables
    #[error("Cyclic foreign-key dependency between tables: {}", tables.join(", "))]
    CyclicDependency { tables: Vec<String> },

    /// Missing or invalid configuration (e.g. no passphrase configured)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A restore step failed; the whole restore was rolled back
    #[error("Restore failed at table '{table}': {message}")]
    RestoreFailure { table: String, message: String },

    /// Host-scoped field protection failures
    #[error("Protection error: {0}")]
    Protection(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Validation errors for caller input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// The operation observed a cancellation request
    #[error("Operation cancelled")]
    Cancelled,
}

impl BackupError {
    /// Create a restore failure for the given table
    pub fn restore_failure(table: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::RestoreFailure {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a "not found" error for backup files
    pub fn backup_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Backup",
            identifier: identifier.into(),
        }
    }

    /// Check if this is a crypto error
    pub fn is_crypto(&self) -> bool {
        matches!(self, Self::Crypto(_))
    }

    /// Check if this is an archive format error
    pub fn is_format(&self) -> bool {
        matches!(self, Self::Format(_))
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<rusqlite::Error> for BackupError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// Result type alias for backup engine operations
pub type BackupResult<T> = Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BackupError::Configuration("no passphrase configured".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: no passphrase configured"
        );
    }

    #[test]
    fn test_cyclic_dependency_display() {
        let err = BackupError::CyclicDependency {
            tables: vec!["a".into(), "b".into()],
        };
        assert_eq!(
            err.to_string(),
            "Cyclic foreign-key dependency between tables: a, b"
        );
    }

    #[test]
    fn test_restore_failure_names_table() {
        let err = BackupError::restore_failure("messages", "FOREIGN KEY constraint failed");
        assert!(err.to_string().contains("'messages'"));
        assert!(matches!(err, BackupError::RestoreFailure { .. }));
    }

    #[test]
    fn test_not_found_error() {
        let err = BackupError::backup_not_found("latest");
        assert_eq!(err.to_string(), "Backup not found: latest");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BackupError = io_err.into();
        assert!(matches!(err, BackupError::Io(_)));
    }
}
