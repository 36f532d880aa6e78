//! Atomic filesystem operations for the file-backed ledger.
//!
//! Every ledger document is a single JSON file. Writes follow this pattern so
//! a reader never observes a half-written document:
//! 1. Write content to a temporary file in the same directory
//! 2. Sync the file to disk (fsync)
//! 3. Atomically replace the original file with `rename()`
//!
//! Temporary files are named `.{filename}.{pid}.{seq}.tmp`, so concurrent
//! writers in different threads or processes never share a temp file. On a
//! crash a temporary file may remain; readers ignore dot-files.

use crate::error::{LabError, Result};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Atomically write bytes to a file.
///
/// The parent directory is created when missing.
///
/// # Returns
///
/// * `Ok(())` - On successful atomic write
/// * `Err(LabError::Store)` - On write or rename failure
pub fn atomic_write<P: AsRef<Path>>(path: P, content: &[u8]) -> Result<()> {
    let path = path.as_ref();

    if let Some(parent) = path.parent()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| {
            LabError::Store(format!(
                "failed to create parent directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }

    let temp_path = generate_temp_path(path)?;
    write_and_sync(&temp_path, content)?;
    atomic_replace(&temp_path, path)
}

/// Generate a unique temporary file path next to the target.
fn generate_temp_path(target: &Path) -> Result<PathBuf> {
    let parent = target.parent().unwrap_or(Path::new("."));
    let filename = target
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| LabError::Store(format!("invalid file path '{}'", target.display())))?;

    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let temp_name = format!(".{}.{}.{}.tmp", filename, std::process::id(), seq);
    Ok(parent.join(temp_name))
}

/// Write content to a file and sync to disk.
fn write_and_sync(path: &Path, content: &[u8]) -> Result<()> {
    let mut file = File::create(path).map_err(|e| {
        LabError::Store(format!(
            "failed to create temporary file '{}': {}",
            path.display(),
            e
        ))
    })?;

    file.write_all(content).map_err(|e| {
        let _ = fs::remove_file(path);
        LabError::Store(format!("failed to write to temporary file: {}", e))
    })?;

    file.sync_all().map_err(|e| {
        let _ = fs::remove_file(path);
        LabError::Store(format!("failed to sync temporary file to disk: {}", e))
    })?;

    Ok(())
}

/// Atomically replace the target file with the source file.
fn atomic_replace(source: &Path, target: &Path) -> Result<()> {
    fs::rename(source, target).map_err(|e| {
        let _ = fs::remove_file(source);
        LabError::Store(format!(
            "failed to atomically replace '{}': {}",
            target.display(),
            e
        ))
    })?;

    // Persist the directory entry as well.
    #[cfg(unix)]
    if let Some(parent) = target.parent()
        && let Ok(dir) = File::open(parent)
    {
        let _ = dir.sync_all();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_new_file() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("position.json");

        atomic_write(&file_path, b"{\"name\":\"A1\"}").unwrap();

        let content = fs::read_to_string(&file_path).unwrap();
        assert_eq!(content, "{\"name\":\"A1\"}");
    }

    #[test]
    fn test_atomic_write_replace_existing() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("position.json");

        fs::write(&file_path, "original content").unwrap();
        atomic_write(&file_path, b"new content").unwrap();

        let content = fs::read_to_string(&file_path).unwrap();
        assert_eq!(content, "new content");
    }

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("positions").join("A1.json");

        atomic_write(&file_path, b"{}").unwrap();

        assert!(file_path.exists());
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("sample.json");

        atomic_write(&file_path, b"content").unwrap();

        let leftovers: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_generate_temp_path_is_unique_and_hidden() {
        let target = Path::new("/ledger/positions/A1.json");
        let first = generate_temp_path(target).unwrap();
        let second = generate_temp_path(target).unwrap();

        assert_ne!(first, second);
        assert_eq!(first.parent().unwrap(), Path::new("/ledger/positions"));
        let name = first.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with(".A1.json."));
        assert!(name.ends_with(".tmp"));
    }

    #[test]
    fn test_concurrent_writers_never_produce_partial_documents() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = Arc::new(temp_dir.path().join("contended.json"));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let file_path = Arc::clone(&file_path);
                thread::spawn(move || {
                    let body = format!("writer-{}", i).repeat(512);
                    atomic_write(file_path.as_path(), body.as_bytes()).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let content = fs::read_to_string(file_path.as_path()).unwrap();
        let prefix = &content[..8];
        assert_eq!(content, prefix.repeat(512));
    }
}
