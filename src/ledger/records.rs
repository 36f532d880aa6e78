//! Ledger record types.
//!
//! These are the JSON documents stored in the positions, samples and devices
//! collections, plus the inputs used to create them.

use super::path::{PositionPath, SEPARATOR};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of a task process, assigned by the task coordinator.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier of a sample.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleId(String);

impl SampleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id (UUID v4, simple form).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SampleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SampleId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for SampleId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A named slot that holds at most one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_device: Option<String>,
    #[serde(default)]
    pub description: String,
    /// Task holding the lock on this position.
    pub task_id: Option<TaskId>,
    pub last_updated: DateTime<Utc>,
}

/// A physical sample tracked by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub id: SampleId,
    pub name: String,
    pub position: Option<String>,
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// A device; ownership mirrors [`PositionRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub name: String,
    pub device_type: String,
    #[serde(default)]
    pub description: String,
    pub task_id: Option<TaskId>,
    pub last_updated: DateTime<Utc>,
}

/// Input for sample creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewSample {
    pub name: String,
    /// Caller-supplied id; generated when absent.
    #[serde(default)]
    pub id: Option<SampleId>,
    #[serde(default)]
    pub position: Option<String>,
    #[serde(default)]
    pub owner: Option<TaskId>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl NewSample {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<SampleId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn at(mut self, position: impl Into<String>) -> Self {
        self.position = Some(position.into());
        self
    }

    pub fn owned_by(mut self, task: TaskId) -> Self {
        self.owner = Some(task);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

fn default_count() -> u32 {
    1
}

/// Declares `number` positions named `name/1..number`, or one named `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionTemplate {
    pub name: String,
    #[serde(default = "default_count")]
    pub number: u32,
    #[serde(default)]
    pub description: String,
}

impl PositionTemplate {
    pub fn new(name: impl Into<String>, number: u32) -> Self {
        Self {
            name: name.into(),
            number,
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Concrete position names, prefixed with `parent_device/` when given.
    pub fn expand(&self, parent_device: Option<&str>) -> Result<Vec<PositionPath>> {
        let names: Vec<String> = if self.number == 1 {
            vec![self.name.clone()]
        } else {
            (1..=self.number)
                .map(|i| format!("{}{}{}", self.name, SEPARATOR, i))
                .collect()
        };

        names
            .iter()
            .map(|name| match parent_device {
                Some(device) => PositionPath::under_device(device, name),
                None => PositionPath::parse(name),
            })
            .collect()
    }
}

/// A device and the positions it carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDefinition {
    pub name: String,
    pub device_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub positions: Vec<PositionTemplate>,
}

impl DeviceDefinition {
    pub fn new(name: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_type: device_type.into(),
            description: String::new(),
            positions: Vec::new(),
        }
    }

    pub fn with_positions(mut self, positions: impl IntoIterator<Item = PositionTemplate>) -> Self {
        self.positions.extend(positions);
        self
    }
}
