//! Document store abstraction behind the ledger.
//!
//! The ledger needs very little from its storage: point lookups, ordered
//! prefix scans, single-document atomic updates, and a named advisory lock
//! that serializes multi-document decisions. Nothing here assumes
//! multi-document transactions.
//!
//! Two backends ship with the crate:
//! - [`FileStore`]: one JSON file per document, shareable across processes
//! - [`MemoryStore`]: ordered in-process maps, for tests and simulations

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::Result;
use serde_json::Value;

/// The record collections of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Positions,
    Samples,
    Devices,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Positions => "positions",
            Collection::Samples => "samples",
            Collection::Devices => "devices",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback applied by [`DocumentStore::update`] to the current document.
pub type UpdateFn<'a> = &'a mut dyn FnMut(&mut Value) -> Result<()>;

/// A document store with single-document atomicity and named locks.
///
/// Keys are compared literally: `scan_prefix("A")` returns every key that
/// starts with the two bytes `A`, never a pattern match.
pub trait DocumentStore: Send + Sync {
    /// Point lookup.
    fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>>;

    /// Insert a new document. Returns false (and writes nothing) if the key exists.
    fn insert(&self, collection: Collection, key: &str, doc: &Value) -> Result<bool>;

    /// Atomically read, modify and write one document.
    ///
    /// Returns the updated document, or `None` if the key does not exist.
    /// If `apply` fails nothing is written.
    fn update(&self, collection: Collection, key: &str, apply: UpdateFn<'_>)
    -> Result<Option<Value>>;

    /// All documents whose key starts with `prefix`, ordered by key.
    fn scan_prefix(&self, collection: Collection, prefix: &str) -> Result<Vec<(String, Value)>>;

    /// Drop every document of a collection.
    fn clear(&self, collection: Collection) -> Result<()>;

    /// Acquire the named advisory lock, waiting for the current holder.
    fn lock(&self, name: &str, action: &str) -> Result<StoreLock>;
}

type ReleaseFn = Box<dyn FnOnce() -> Result<()> + Send>;

/// Guard of a named store lock; the lock is released when the guard drops.
pub struct StoreLock {
    name: String,
    release: Option<ReleaseFn>,
}

impl StoreLock {
    /// Wrap a backend-specific release action.
    pub fn new(name: impl Into<String>, release: impl FnOnce() -> Result<()> + Send + 'static) -> Self {
        Self {
            name: name.into(),
            release: Some(Box::new(release)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release now and report a failure instead of logging it.
    pub fn release(mut self) -> Result<()> {
        match self.release.take() {
            Some(release) => release(),
            None => Ok(()),
        }
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        if let Some(release) = self.release.take()
            && let Err(e) = release()
        {
            tracing::warn!(lock = %self.name, error = %e, "failed to release store lock");
        }
    }
}

impl std::fmt::Debug for StoreLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreLock")
            .field("name", &self.name)
            .field("held", &self.release.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_store_lock_releases_once_on_drop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let lock = StoreLock::new("reservation", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(lock.name(), "reservation");
        drop(lock);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_store_lock_explicit_release_reports_error() {
        let lock = StoreLock::new("reservation", || {
            Err(crate::error::LabError::Lock("gone".to_string()))
        });
        assert!(lock.release().is_err());
    }

    #[test]
    fn test_collection_names() {
        assert_eq!(Collection::Positions.to_string(), "positions");
        assert_eq!(Collection::Samples.as_str(), "samples");
        assert_eq!(Collection::Devices.as_str(), "devices");
    }
}
