//! Lock acquisition, listing, and clearing operations.

use super::guard::LockGuard;
use super::metadata::LockMetadata;
use super::types::{LockInfo, LockOptions, LockType};
use crate::context::{LOCK_EXTENSION, LedgerContext, decode_key};
use crate::error::{LabError, Result};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::thread;
use std::time::{Instant, SystemTime};

/// Try to create a lock file using create_new semantics.
///
/// # Returns
///
/// * `Ok(Some(LockGuard))` - Lock acquired
/// * `Ok(None)` - Lock file already exists (held by someone else)
/// * `Err(LabError::Lock)` - The lock file could not be created or written
pub fn try_acquire_lock(lock_path: &Path, metadata: &LockMetadata) -> Result<Option<LockGuard>> {
    if let Some(parent) = lock_path.parent()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| {
            LabError::Lock(format!(
                "failed to create locks directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }

    let mut file = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
    {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(None),
        Err(e) => {
            return Err(LabError::Lock(format!(
                "failed to acquire lock '{}': {}",
                lock_path.display(),
                e
            )));
        }
    };

    let json = metadata.to_json()?;
    file.write_all(json.as_bytes()).map_err(|e| {
        let _ = fs::remove_file(lock_path);
        LabError::Lock(format!("failed to write lock metadata: {}", e))
    })?;

    file.sync_all().map_err(|e| {
        let _ = fs::remove_file(lock_path);
        LabError::Lock(format!("failed to sync lock file: {}", e))
    })?;

    Ok(Some(LockGuard::new(lock_path.to_path_buf(), metadata.clone())))
}

/// Acquire the named lock, waiting for the current holder if necessary.
///
/// The lock file is polled every `options.retry` until `options.wait` has
/// elapsed. A lock file older than `options.stale_after` belongs to a holder
/// that died inside its critical section; it is broken and the wait goes on.
///
/// # Returns
///
/// * `Ok(LockGuard)` - Successfully acquired lock
/// * `Err(LabError::Lock)` - Still held after `options.wait`
pub fn acquire_lock(
    ctx: &LedgerContext,
    name: &str,
    action: &str,
    options: &LockOptions,
) -> Result<LockGuard> {
    let lock_path = ctx.lock_path(name);
    let started = Instant::now();

    loop {
        let metadata = LockMetadata::new(action);
        if let Some(guard) = try_acquire_lock(&lock_path, &metadata)? {
            return Ok(guard);
        }

        if break_if_stale(&lock_path, options)? {
            continue;
        }

        if started.elapsed() >= options.wait {
            let holder = match LockMetadata::from_file(&lock_path) {
                Ok(meta) => format!(
                    " (held by {} for {}, action: {})",
                    meta.owner,
                    meta.age_string(),
                    meta.action
                ),
                Err(_) => String::new(),
            };
            return Err(LabError::Lock(format!(
                "lock '{}' is held by another process{}",
                name, holder
            )));
        }

        thread::sleep(options.retry);
    }
}

/// Remove the lock file at `lock_path` when its holder is gone.
///
/// Returns true when a stale lock was removed.
fn break_if_stale(lock_path: &Path, options: &LockOptions) -> Result<bool> {
    let stale_meta = match LockMetadata::from_file(lock_path) {
        Ok(meta) if meta.is_stale(options.stale_after) => Some(meta),
        Ok(_) => return Ok(false),
        // Metadata is written right after create_new; an unreadable file is
        // either mid-creation or left by a crash between the two steps.
        Err(_) => {
            if !file_older_than(lock_path, options.stale_after) {
                return Ok(false);
            }
            None
        }
    };

    // Re-read so a lock re-acquired since the first read is left alone.
    if let Some(meta) = &stale_meta {
        match LockMetadata::from_file(lock_path) {
            Ok(current) if current.created_at == meta.created_at => {}
            _ => return Ok(false),
        }
    }

    match fs::remove_file(lock_path) {
        Ok(()) => {
            tracing::warn!(
                lock = %lock_path.display(),
                holder = stale_meta.as_ref().map(|m| m.owner.as_str()).unwrap_or("unknown"),
                "broke stale lock"
            );
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(LabError::Lock(format!(
            "failed to break stale lock '{}': {}",
            lock_path.display(),
            e
        ))),
    }
}

fn file_older_than(path: &Path, threshold: std::time::Duration) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > threshold)
}

/// List all active locks of the ledger.
pub fn list_locks(ctx: &LedgerContext, stale_after: std::time::Duration) -> Result<Vec<LockInfo>> {
    let mut locks = Vec::new();

    if !ctx.locks_dir.exists() {
        return Ok(locks);
    }

    let entries = fs::read_dir(&ctx.locks_dir).map_err(|e| {
        LabError::Store(format!(
            "failed to read locks directory '{}': {}",
            ctx.locks_dir.display(),
            e
        ))
    })?;

    for entry in entries {
        let entry = entry
            .map_err(|e| LabError::Store(format!("failed to read locks directory entry: {}", e)))?;

        let path = entry.path();

        if path.extension().and_then(|e| e.to_str()) != Some(LOCK_EXTENSION) {
            continue;
        }

        let metadata = match LockMetadata::from_file(&path) {
            Ok(meta) => meta,
            Err(_) => continue, // Skip lock files still being written
        };

        let Some(name) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(decode_key)
        else {
            continue;
        };

        let is_stale = metadata.is_stale(stale_after);
        locks.push(LockInfo {
            lock_type: LockType::of(&name),
            path,
            name,
            metadata,
            is_stale,
        });
    }

    locks.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(locks)
}

/// Clear a lock file.
///
/// This removes the lock file regardless of its holder. The caller is
/// responsible for verifying that clearing the lock is appropriate.
///
/// # Returns
///
/// * `Ok(LockInfo)` - Information about the cleared lock (for audit purposes)
/// * `Err(LabError::NotFound)` - Lock file doesn't exist
pub fn clear_lock(
    ctx: &LedgerContext,
    name: &str,
    stale_after: std::time::Duration,
) -> Result<LockInfo> {
    let lock_path = ctx.lock_path(name);

    if !lock_path.exists() {
        return Err(LabError::NotFound(format!(
            "lock '{}' does not exist at: {}",
            name,
            lock_path.display()
        )));
    }

    let metadata = LockMetadata::from_file(&lock_path)?;
    let is_stale = metadata.is_stale(stale_after);

    let lock_info = LockInfo {
        path: lock_path.clone(),
        name: name.to_string(),
        lock_type: LockType::of(name),
        metadata,
        is_stale,
    };

    fs::remove_file(&lock_path).map_err(|e| {
        LabError::Lock(format!(
            "failed to clear lock '{}': {}",
            lock_path.display(),
            e
        ))
    })?;

    Ok(lock_info)
}
