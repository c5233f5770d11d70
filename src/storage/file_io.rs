//! File I/O utilities with atomic writes
//!
//! Archives and settings are written to a temp file in the target directory,
//! synced, then renamed over the destination, so a crash never leaves a
//! half-written backup behind.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{BackupError, BackupResult};

/// Read JSON from a file, returning a default value if file doesn't exist
pub fn read_json<T, P>(path: P) -> BackupResult<T>
where
    T: DeserializeOwned + Default,
    P: AsRef<Path>,
{
    let path = path.as_ref();

    if !path.exists() {
        return Ok(T::default());
    }

    let file = File::open(path)
        .map_err(|e| BackupError::Io(format!("Failed to open {}: {}", path.display(), e)))?;

    let reader = BufReader::new(file);
    serde_json::from_reader(reader)
        .map_err(|e| BackupError::Json(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Write JSON to a file atomically (write to temp, then rename)
pub fn write_json_atomic<T, P>(path: P, data: &T) -> BackupResult<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    write_atomic(path.as_ref(), |writer| {
        serde_json::to_writer_pretty(&mut *writer, data)
            .map_err(|e| BackupError::Json(format!("Failed to serialize data: {}", e)))
    })
}

/// Write raw bytes to a file atomically
pub fn write_bytes_atomic<P: AsRef<Path>>(path: P, bytes: &[u8]) -> BackupResult<()> {
    write_atomic(path.as_ref(), |writer| {
        writer
            .write_all(bytes)
            .map_err(|e| BackupError::Io(format!("Failed to write data: {}", e)))
    })
}

/// Create `path` holding `bytes`, readable by the owner only, unless it
/// already exists
///
/// The content goes to a private temp file that is hard-linked into place,
/// so the file is never seen half-written and an existing file is never
/// replaced. Returns `false` when the file already existed.
pub fn create_private_file<P: AsRef<Path>>(path: P, bytes: &[u8]) -> BackupResult<bool> {
    let path = path.as_ref();
    ensure_parent(path)?;

    let temp_path = unique_temp_path_for(path);
    let created = write_private(&temp_path, bytes).and_then(|_| {
        match fs::hard_link(&temp_path, path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(BackupError::Io(format!(
                "Failed to create {}: {}",
                path.display(),
                e
            ))),
        }
    });

    let _ = fs::remove_file(&temp_path);
    created
}

fn write_private(path: &Path, bytes: &[u8]) -> BackupResult<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options
        .open(path)
        .map_err(|e| BackupError::Io(format!("Failed to create temp file: {}", e)))?;
    file.write_all(bytes)
        .map_err(|e| BackupError::Io(format!("Failed to write data: {}", e)))?;
    file.sync_all()
        .map_err(|e| BackupError::Io(format!("Failed to sync data: {}", e)))
}

fn ensure_parent(path: &Path) -> BackupResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            BackupError::Io(format!(
                "Failed to create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }
    Ok(())
}

fn write_atomic<F>(path: &Path, write: F) -> BackupResult<()>
where
    F: FnOnce(&mut BufWriter<File>) -> BackupResult<()>,
{
    ensure_parent(path)?;

    // Same directory as the target so the rename stays on one filesystem
    let temp_path = temp_path_for(path);

    let file = File::create(&temp_path)
        .map_err(|e| BackupError::Io(format!("Failed to create temp file: {}", e)))?;

    let mut writer = BufWriter::new(file);
    let written = write(&mut writer).and_then(|_| {
        writer
            .flush()
            .map_err(|e| BackupError::Io(format!("Failed to flush data: {}", e)))?;
        writer
            .get_ref()
            .sync_all()
            .map_err(|e| BackupError::Io(format!("Failed to sync data: {}", e)))
    });

    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        BackupError::Io(format!("Failed to rename temp file: {}", e))
    })
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

// Distinct per process and per call, for writers that may race
fn unique_temp_path_for(path: &Path) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(
        ".{}-{}.tmp",
        process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    path.with_file_name(name)
}
