//! The resource ledger.
//!
//! Three linked collections over a [`DocumentStore`]:
//! - positions, keyed by their full path name
//! - samples, keyed by sample id; a sample references at most one position
//! - devices, keyed by device name; ownership mirrors positions
//!
//! The ledger is the only shared mutable state between task processes. Each
//! method here is a single-document operation; decisions spanning several
//! documents are taken under [`Ledger::decision_lock`].

mod devices;
mod path;
mod positions;
mod records;
mod samples;


pub use path::{
    NamePrefix, PositionPath, RESERVED_CHARS, SEPARATOR, validate_device_name, validate_name,
};
pub use records::{
    DeviceDefinition, DeviceRecord, NewSample, PositionRecord, PositionTemplate, SampleId,
    SampleRecord, TaskId,
};

use crate::error::{LabError, Result};
use crate::events::{Event, EventLog};
use crate::store::{Collection, DocumentStore, StoreLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// Name of the store lock that serializes every multi-document decision.
pub const DECISION_LOCK: &str = "reservation";

/// Typed access to the ledger collections.
pub struct Ledger {
    store: Arc<dyn DocumentStore>,
    events: EventLog,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger").field("events", &self.events).finish()
    }
}

impl Ledger {
    pub fn new(store: Arc<dyn DocumentStore>, events: EventLog) -> Self {
        Self { store, events }
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Take the lock that serializes read-select-commit decisions.
    pub fn decision_lock(&self, action: &str) -> Result<StoreLock> {
        self.store.lock(DECISION_LOCK, action)
    }

    /// Append an audit event. The mutation it describes is already committed,
    /// so a log failure is reported but not propagated.
    pub(crate) fn record(&self, event: Event) {
        if let Err(e) = self.events.append(&event) {
            tracing::warn!(action = %event.action, error = %e, "failed to append audit event");
        }
    }

    fn load<T: DeserializeOwned>(&self, collection: Collection, key: &str) -> Result<Option<T>> {
        self.store
            .get(collection, key)?
            .map(|doc| decode(collection, key, doc))
            .transpose()
    }

    fn scan<T: DeserializeOwned>(&self, collection: Collection, prefix: &str) -> Result<Vec<T>> {
        self.store
            .scan_prefix(collection, prefix)?
            .into_iter()
            .map(|(key, doc)| decode(collection, &key, doc))
            .collect()
    }

    fn insert<T: Serialize>(&self, collection: Collection, key: &str, record: &T) -> Result<bool> {
        let doc = serde_json::to_value(record).map_err(|e| {
            LabError::Store(format!(
                "failed to serialize {} document '{}': {}",
                collection, key, e
            ))
        })?;
        self.store.insert(collection, key, &doc)
    }

    /// Read-modify-write one typed record. `None` if the key does not exist.
    fn update<T, F>(&self, collection: Collection, key: &str, mut apply: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(&mut T) -> Result<()>,
    {
        let updated = self.store.update(collection, key, &mut |doc| {
            let mut record: T = decode(collection, key, doc.clone())?;
            apply(&mut record)?;
            *doc = serde_json::to_value(&record).map_err(|e| {
                LabError::Store(format!(
                    "failed to serialize {} document '{}': {}",
                    collection, key, e
                ))
            })?;
            Ok(())
        })?;

        updated.map(|doc| decode(collection, key, doc)).transpose()
    }
}

fn decode<T: DeserializeOwned>(
    collection: Collection,
    key: &str,
    doc: serde_json::Value,
) -> Result<T> {
    serde_json::from_value(doc).map_err(|e| {
        LabError::Store(format!(
            "malformed {} document '{}': {}",
            collection, key, e
        ))
    })
}
