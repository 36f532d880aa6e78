//! File-backed document store.
//!
//! Each document is `{ledger_dir}/{collection}/{encoded key}.json`, written
//! with [`atomic_write`]. Read-modify-write of one document is serialized by
//! a per-document lock file; named sections use the same lock machinery.

use super::{Collection, DocumentStore, StoreLock, UpdateFn};
use crate::context::{DOCUMENT_EXTENSION, LedgerContext, decode_key};
use crate::error::{LabError, Result};
use crate::fs::atomic_write;
use crate::locks::{
    DOCUMENT_LOCK_PREFIX, LockGuard, LockInfo, LockOptions, acquire_lock, clear_lock, list_locks,
};
use serde_json::Value;
use std::fs;
use std::path::Path;

/// Document store persisted as JSON files below a [`LedgerContext`].
#[derive(Debug, Clone)]
pub struct FileStore {
    ctx: LedgerContext,
    lock_options: LockOptions,
}

impl FileStore {
    /// Open (and lay out, if needed) the ledger at `ctx.root`.
    pub fn open(ctx: LedgerContext, lock_options: LockOptions) -> Result<Self> {
        ctx.ensure_layout()?;
        Ok(Self { ctx, lock_options })
    }

    pub fn context(&self) -> &LedgerContext {
        &self.ctx
    }

    /// Lock files currently present, for operators inspecting a stuck ledger.
    pub fn held_locks(&self) -> Result<Vec<LockInfo>> {
        list_locks(&self.ctx, self.lock_options.stale_after)
    }

    /// Remove a lock file left behind by a crashed process.
    ///
    /// Clearing a lock that is still in use breaks mutual exclusion; check
    /// [`FileStore::held_locks`] first.
    pub fn clear_lock(&self, name: &str) -> Result<LockInfo> {
        let info = clear_lock(&self.ctx, name, self.lock_options.stale_after)?;
        tracing::warn!(lock = %name, owner = %info.metadata.owner, "lock cleared by operator");
        Ok(info)
    }

    fn document_lock(&self, collection: Collection, key: &str, action: &str) -> Result<LockGuard> {
        let name = format!("{}{}:{}", DOCUMENT_LOCK_PREFIX, collection, key);
        acquire_lock(&self.ctx, &name, action, &self.lock_options)
    }

    fn write(&self, path: &Path, doc: &Value) -> Result<()> {
        let json = serde_json::to_vec_pretty(doc)
            .map_err(|e| LabError::Store(format!("failed to serialize document: {}", e)))?;
        atomic_write(path, &json)
    }
}

fn read_document(path: &Path) -> Result<Option<Value>> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(LabError::Store(format!(
                "failed to read document '{}': {}",
                path.display(),
                e
            )));
        }
    };

    serde_json::from_slice(&content).map(Some).map_err(|e| {
        LabError::Store(format!(
            "failed to parse document '{}': {}",
            path.display(),
            e
        ))
    })
}

impl DocumentStore for FileStore {
    fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>> {
        read_document(&self.ctx.document_path(collection, key))
    }

    fn insert(&self, collection: Collection, key: &str, doc: &Value) -> Result<bool> {
        let _guard = self.document_lock(collection, key, "insert")?;
        let path = self.ctx.document_path(collection, key);
        if path.exists() {
            return Ok(false);
        }
        self.write(&path, doc)?;
        Ok(true)
    }

    fn update(
        &self,
        collection: Collection,
        key: &str,
        apply: UpdateFn<'_>,
    ) -> Result<Option<Value>> {
        let _guard = self.document_lock(collection, key, "update")?;
        let path = self.ctx.document_path(collection, key);
        let Some(mut doc) = read_document(&path)? else {
            return Ok(None);
        };
        apply(&mut doc)?;
        self.write(&path, &doc)?;
        Ok(Some(doc))
    }

    fn scan_prefix(&self, collection: Collection, prefix: &str) -> Result<Vec<(String, Value)>> {
        let dir = self.ctx.collection_dir(collection);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(LabError::Store(format!(
                    "failed to read collection '{}': {}",
                    dir.display(),
                    e
                )));
            }
        };

        let mut docs = Vec::new();
        for entry in entries {
            let entry = entry
                .map_err(|e| LabError::Store(format!("failed to read collection entry: {}", e)))?;
            let path = entry.path();

            // Temp files of in-flight writes start with a dot.
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if file_name.starts_with('.') {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(DOCUMENT_EXTENSION) {
                continue;
            }
            let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(decode_key)
            else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            // A concurrent clear may remove the file between listing and reading.
            if let Some(doc) = read_document(&path)? {
                docs.push((key, doc));
            }
        }

        docs.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(docs)
    }

    fn clear(&self, collection: Collection) -> Result<()> {
        let dir = self.ctx.collection_dir(collection);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(LabError::Store(format!(
                    "failed to clear collection '{}': {}",
                    dir.display(),
                    e
                )));
            }
        }
        fs::create_dir_all(&dir).map_err(|e| {
            LabError::Store(format!(
                "failed to recreate collection '{}': {}",
                dir.display(),
                e
            ))
        })
    }

    fn lock(&self, name: &str, action: &str) -> Result<StoreLock> {
        let guard = acquire_lock(&self.ctx, name, action, &self.lock_options)?;
        Ok(StoreLock::new(name, move || guard.release()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    fn open_store() -> (TempDir, FileStore) {
        let temp_dir = TempDir::new().unwrap();
        let ctx = LedgerContext::resolve_from(temp_dir.path().join("ledger"));
        let store = FileStore::open(ctx, LockOptions::default()).unwrap();
        (temp_dir, store)
    }

    #[test]
    fn test_insert_and_get() {
        let (_temp_dir, store) = open_store();

        let doc = json!({"name": "oven/tray/1", "task_id": null});
        assert!(store.insert(Collection::Positions, "oven/tray/1", &doc).unwrap());
        assert!(!store.insert(Collection::Positions, "oven/tray/1", &json!({})).unwrap());

        let loaded = store.get(Collection::Positions, "oven/tray/1").unwrap();
        assert_eq!(loaded, Some(doc));
        assert_eq!(store.get(Collection::Positions, "oven/tray/2").unwrap(), None);
    }

    #[test]
    fn test_update_applies_and_persists() {
        let (_temp_dir, store) = open_store();
        store
            .insert(Collection::Positions, "A1", &json!({"task_id": null}))
            .unwrap();

        let updated = store
            .update(Collection::Positions, "A1", &mut |doc| {
                doc["task_id"] = json!("T1");
                Ok(())
            })
            .unwrap();
        assert_eq!(updated, Some(json!({"task_id": "T1"})));
        assert_eq!(
            store.get(Collection::Positions, "A1").unwrap(),
            Some(json!({"task_id": "T1"}))
        );

        let missing = store
            .update(Collection::Positions, "A9", &mut |_| Ok(()))
            .unwrap();
        assert_eq!(missing, None);
    }

    #[test]
    fn test_failed_update_writes_nothing() {
        let (_temp_dir, store) = open_store();
        store
            .insert(Collection::Samples, "s1", &json!({"position": null}))
            .unwrap();

        let result = store.update(Collection::Samples, "s1", &mut |doc| {
            doc["position"] = json!("A1");
            Err(LabError::Ownership("refused".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(
            store.get(Collection::Samples, "s1").unwrap(),
            Some(json!({"position": null}))
        );
    }

    #[test]
    fn test_scan_prefix_is_literal_and_ordered() {
        let (_temp_dir, store) = open_store();
        for key in ["A2", "A1", "A10", "B1", "A.1x", "oven/tray/1"] {
            store
                .insert(Collection::Positions, key, &json!({"name": key}))
                .unwrap();
        }

        let keys: Vec<String> = store
            .scan_prefix(Collection::Positions, "A")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["A.1x", "A1", "A10", "A2"]);

        let dotted = store.scan_prefix(Collection::Positions, "A.").unwrap();
        assert_eq!(dotted.len(), 1);

        let nested = store.scan_prefix(Collection::Positions, "oven/").unwrap();
        assert_eq!(nested[0].0, "oven/tray/1");
    }

    #[test]
    fn test_clear_drops_collection_only() {
        let (_temp_dir, store) = open_store();
        store.insert(Collection::Positions, "A1", &json!({})).unwrap();
        store.insert(Collection::Samples, "s1", &json!({})).unwrap();

        store.clear(Collection::Positions).unwrap();

        assert!(store.scan_prefix(Collection::Positions, "").unwrap().is_empty());
        assert_eq!(store.scan_prefix(Collection::Samples, "").unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let (_temp_dir, store) = open_store();
        let store = Arc::new(store);
        store
            .insert(Collection::Devices, "counter", &json!({"n": 0}))
            .unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..10 {
                        store
                            .update(Collection::Devices, "counter", &mut |doc| {
                                let n = doc["n"].as_u64().unwrap_or(0);
                                doc["n"] = json!(n + 1);
                                Ok(())
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let doc = store.get(Collection::Devices, "counter").unwrap().unwrap();
        assert_eq!(doc["n"], json!(40));
    }

    #[test]
    fn test_named_lock_excludes_second_holder() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = LedgerContext::resolve_from(temp_dir.path());
        let options = LockOptions {
            wait: Duration::from_millis(50),
            ..LockOptions::default()
        };
        let store = FileStore::open(ctx, options).unwrap();

        let held = store.lock("reservation", "reserve").unwrap();
        assert!(matches!(
            store.lock("reservation", "reserve"),
            Err(LabError::Lock(_))
        ));

        held.release().unwrap();
        assert!(store.lock("reservation", "reserve").is_ok());
    }

    #[test]
    fn test_operator_clears_abandoned_lock() {
        let (_temp_dir, store) = open_store();

        // A holder that never releases, like a crashed process.
        std::mem::forget(store.lock("reservation", "reserve").unwrap());

        let held = store.held_locks().unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].name, "reservation");
        assert!(!held[0].is_stale);

        store.clear_lock("reservation").unwrap();
        assert!(store.held_locks().unwrap().is_empty());
        assert!(matches!(
            store.clear_lock("reservation"),
            Err(LabError::NotFound(_))
        ));
        store.lock("reservation", "reserve").unwrap().release().unwrap();
    }
}
