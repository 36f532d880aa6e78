//! RAII lock guard implementation.

use super::metadata::LockMetadata;
use crate::error::{LabError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// RAII guard for a lock file.
///
/// When dropped, the lock file is deleted if it still carries this holder's
/// metadata. A file left by a holder that broke this one as stale is kept.
/// If deletion fails, a warning is logged but no panic occurs.
#[derive(Debug)]
pub struct LockGuard {
    /// Path to the lock file.
    path: PathBuf,

    /// Metadata written when the lock was taken.
    metadata: LockMetadata,

    /// Whether the lock has been released manually.
    released: bool,
}

impl LockGuard {
    /// Create a new lock guard for the given path.
    pub(super) fn new(path: PathBuf, metadata: LockMetadata) -> Self {
        Self {
            path,
            metadata,
            released: false,
        }
    }

    /// Get the path to the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Manually release the lock, reporting a failed delete.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.remove_own_file()
    }

    fn remove_own_file(&self) -> Result<()> {
        match LockMetadata::from_file(&self.path) {
            Ok(current) if current.same_holder(&self.metadata) => {}
            Ok(current) => {
                tracing::warn!(
                    lock = %self.path.display(),
                    holder = %current.owner,
                    "lock was taken over by another holder, leaving it in place"
                );
                return Ok(());
            }
            Err(_) if !self.path.exists() => return Ok(()),
            Err(e) => return Err(e),
        }

        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LabError::Lock(format!(
                "failed to release lock '{}': {}",
                self.path.display(),
                e
            ))),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.remove_own_file()
        {
            tracing::warn!(
                lock = %self.path.display(),
                error = %e,
                "failed to release lock"
            );
        }
    }
}
