//! In-process document store over ordered maps.

use super::{Collection, DocumentStore, StoreLock, UpdateFn};
use crate::error::{LabError, Result};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

type Documents = BTreeMap<String, Value>;

#[derive(Debug, Default)]
struct LockTable {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl LockTable {
    fn release(&self, name: &str) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        held.remove(name);
        self.released.notify_all();
    }
}

/// Document store kept entirely in memory.
///
/// Shares nothing across processes; locks only exclude threads of this one.
#[derive(Debug)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Collection, Documents>>,
    locks: Arc<LockTable>,
    lock_wait: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl MemoryStore {
    /// Create an empty store whose named locks give up after `lock_wait`.
    pub fn new(lock_wait: Duration) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            locks: Arc::new(LockTable::default()),
            lock_wait,
        }
    }
}

impl DocumentStore for MemoryStore {
    fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        Ok(collections
            .get(&collection)
            .and_then(|docs| docs.get(key))
            .cloned())
    }

    fn insert(&self, collection: Collection, key: &str, doc: &Value) -> Result<bool> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let docs = collections.entry(collection).or_default();
        if docs.contains_key(key) {
            return Ok(false);
        }
        docs.insert(key.to_string(), doc.clone());
        Ok(true)
    }

    fn update(
        &self,
        collection: Collection,
        key: &str,
        apply: UpdateFn<'_>,
    ) -> Result<Option<Value>> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(current) = collections.get_mut(&collection).and_then(|d| d.get_mut(key)) else {
            return Ok(None);
        };

        // Work on a copy so a failing callback leaves the stored document untouched.
        let mut doc = current.clone();
        apply(&mut doc)?;
        *current = doc.clone();
        Ok(Some(doc))
    }

    fn scan_prefix(&self, collection: Collection, prefix: &str) -> Result<Vec<(String, Value)>> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        let Some(docs) = collections.get(&collection) else {
            return Ok(Vec::new());
        };

        Ok(docs
            .range::<str, _>((std::ops::Bound::Included(prefix), std::ops::Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, doc)| (key.clone(), doc.clone()))
            .collect())
    }

    fn clear(&self, collection: Collection) -> Result<()> {
        let mut collections = self
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        collections.remove(&collection);
        Ok(())
    }

    fn lock(&self, name: &str, action: &str) -> Result<StoreLock> {
        let deadline = Instant::now().checked_add(self.lock_wait);
        let mut held = self.locks.held.lock().unwrap_or_else(PoisonError::into_inner);

        while held.contains(name) {
            held = match deadline {
                None => self
                    .locks
                    .released
                    .wait(held)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(LabError::Lock(format!(
                            "lock '{}' is held by another thread (action: {})",
                            name, action
                        )));
                    }
                    self.locks
                        .released
                        .wait_timeout(held, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
        held.insert(name.to_string());
        drop(held);

        let table = Arc::clone(&self.locks);
        let owned = name.to_string();
        Ok(StoreLock::new(name, move || {
            table.release(&owned);
            Ok(())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::thread;

    #[test]
    fn test_insert_get_update() {
        let store = MemoryStore::default();
        assert!(store.insert(Collection::Samples, "s1", &json!({"position": null})).unwrap());
        assert!(!store.insert(Collection::Samples, "s1", &json!({})).unwrap());

        let updated = store
            .update(Collection::Samples, "s1", &mut |doc| {
                doc["position"] = json!("A1");
                Ok(())
            })
            .unwrap();
        assert_eq!(updated, Some(json!({"position": "A1"})));
        assert_eq!(
            store.get(Collection::Samples, "s1").unwrap(),
            Some(json!({"position": "A1"}))
        );
        assert_eq!(store.get(Collection::Positions, "s1").unwrap(), None);
    }

    #[test]
    fn test_failed_update_keeps_document() {
        let store = MemoryStore::default();
        store.insert(Collection::Devices, "d1", &json!({"task_id": null})).unwrap();

        let result = store.update(Collection::Devices, "d1", &mut |doc| {
            doc["task_id"] = json!("T1");
            Err(LabError::Ownership("no".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(
            store.get(Collection::Devices, "d1").unwrap(),
            Some(json!({"task_id": null}))
        );
    }

    #[test]
    fn test_scan_prefix_range() {
        let store = MemoryStore::default();
        for key in ["A2", "A1", "B1", "A10", "AB"] {
            store.insert(Collection::Positions, key, &json!({})).unwrap();
        }

        let keys: Vec<String> = store
            .scan_prefix(Collection::Positions, "A1")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec!["A1", "A10"]);

        assert_eq!(store.scan_prefix(Collection::Positions, "").unwrap().len(), 5);
        assert!(store.scan_prefix(Collection::Positions, "C").unwrap().is_empty());
    }

    #[test]
    fn test_clear() {
        let store = MemoryStore::default();
        store.insert(Collection::Positions, "A1", &json!({})).unwrap();
        store.clear(Collection::Positions).unwrap();
        assert!(store.scan_prefix(Collection::Positions, "").unwrap().is_empty());
    }

    #[test]
    fn test_lock_times_out_while_held() {
        let store = MemoryStore::new(Duration::from_millis(30));
        let held = store.lock("reservation", "reserve").unwrap();

        let err = store.lock("reservation", "reserve").unwrap_err();
        assert!(matches!(err, LabError::Lock(_)));

        drop(held);
        assert!(store.lock("reservation", "reserve").is_ok());
    }

    #[test]
    fn test_lock_waits_for_release() {
        let store = Arc::new(MemoryStore::new(Duration::from_secs(5)));
        let held = store.lock("reservation", "first").unwrap();

        let waiter = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.lock("reservation", "second").map(|l| l.release()))
        };

        thread::sleep(Duration::from_millis(20));
        held.release().unwrap();
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_unbounded_lock_wait() {
        let store = Arc::new(MemoryStore::new(Duration::MAX));
        let held = store.lock("reservation", "first").unwrap();

        let waiter = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.lock("reservation", "second").map(|l| l.release()))
        };

        thread::sleep(Duration::from_millis(20));
        held.release().unwrap();
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_distinct_lock_names_do_not_block() {
        let store = MemoryStore::new(Duration::from_millis(10));
        let _a = store.lock("reservation", "reserve").unwrap();
        assert!(store.lock("other", "reserve").is_ok());
    }
}
