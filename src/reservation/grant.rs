//! Grants handed out by the reservation engine.

use crate::ledger::{SEPARATOR, TaskId};
use crate::request::DeviceSelector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque identifier of one grant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A position held by a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantedPosition {
    pub name: String,
    /// False when the task already owned the position before this grant.
    pub need_release: bool,
}

/// The device chosen for one selector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAssignment {
    pub selector: DeviceSelector,
    pub device: String,
    pub need_release: bool,
}

/// A bundle of devices and positions exclusively held by one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub request_id: RequestId,
    pub task_id: TaskId,
    pub devices: Vec<DeviceAssignment>,
    /// Keyed by resolved prefix: `{device}/{prefix}` for device selectors.
    pub positions: BTreeMap<String, Vec<GrantedPosition>>,
}

impl Grant {
    /// Device chosen for `selector`.
    pub fn device(&self, selector: &DeviceSelector) -> Option<&str> {
        self.devices
            .iter()
            .find(|a| &a.selector == selector)
            .map(|a| a.device.as_str())
    }

    /// Positions granted for `prefix` as it was written under `selector`.
    pub fn positions_for(&self, selector: &DeviceSelector, prefix: &str) -> Option<&[GrantedPosition]> {
        let key = match selector {
            DeviceSelector::Unowned => prefix.to_string(),
            _ => format!("{}{}{}", self.device(selector)?, SEPARATOR, prefix),
        };
        self.positions.get(&key).map(Vec::as_slice)
    }

    pub fn position_names(&self) -> impl Iterator<Item = &str> {
        self.positions
            .values()
            .flatten()
            .map(|p| p.name.as_str())
    }

    pub fn device_names(&self) -> impl Iterator<Item = &str> {
        self.devices.iter().map(|a| a.device.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty() && self.positions.values().all(Vec::is_empty)
    }
}
