//! Resource request shape.
//!
//! A [`ResourceRequest`] maps a [`DeviceSelector`] to the position items
//! wanted on that device (or on no device). Its JSON form is a list of
//! entries:
//!
//! ```json
//! [
//!   {"device_type": "furnace", "positions": [{"prefix": "tray", "number": 4}]},
//!   {"device": "arm1", "positions": []},
//!   {"positions": ["A"]}
//! ]
//! ```
//!
//! A bare string position item is shorthand for `{"prefix": .., "number": 1}`.
//! Unknown fields are rejected.

use crate::error::{LabError, Result};
use crate::ledger::{NamePrefix, validate_device_name, validate_name};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Scheduling priority of a resource request. Higher is served first.
///
/// The scale is a convention: 0..=40 for normal work, 100 and above for
/// urgent or error-correcting requests. Values are not clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u32);

impl Priority {
    pub const NORMAL: Priority = Priority(20);
    pub const URGENT: Priority = Priority(100);
}

impl Default for Priority {
    fn default() -> Self {
        Priority::NORMAL
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which device a group of position items is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum DeviceSelector {
    /// One specific device.
    ByName(String),
    /// Any available device of this type.
    ByType(String),
    /// Positions that are addressed by their full name.
    Unowned,
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::ByName(name) => write!(f, "device '{}'", name),
            DeviceSelector::ByType(device_type) => write!(f, "device type '{}'", device_type),
            DeviceSelector::Unowned => write!(f, "unowned positions"),
        }
    }
}

fn default_number() -> u32 {
    1
}

/// `number` positions whose names start with `prefix`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PositionRequest {
    pub prefix: String,
    #[serde(default = "default_number")]
    pub number: u32,
}

impl PositionRequest {
    pub fn new(prefix: impl Into<String>, number: u32) -> Self {
        Self {
            prefix: prefix.into(),
            number,
        }
    }
}

impl From<&str> for PositionRequest {
    fn from(prefix: &str) -> Self {
        Self::new(prefix, 1)
    }
}

/// A position item as written in JSON: a bare prefix or a full request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PositionItem {
    Prefix(String),
    Full(PositionRequest),
}

impl From<PositionItem> for PositionRequest {
    fn from(item: PositionItem) -> Self {
        match item {
            PositionItem::Prefix(prefix) => PositionRequest::new(prefix, 1),
            PositionItem::Full(request) => request,
        }
    }
}

/// One entry of the JSON list form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default)]
    pub positions: Vec<PositionItem>,
}

/// A bundle of devices and positions requested together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RequestEntry>", into = "Vec<RequestEntry>")]
pub struct ResourceRequest {
    entries: BTreeMap<DeviceSelector, Vec<PositionRequest>>,
}

impl ResourceRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the device `name`, plus `positions` relative to it.
    pub fn device<I, P>(self, name: impl Into<String>, positions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PositionRequest>,
    {
        self.with(DeviceSelector::ByName(name.into()), positions)
    }

    /// Request any free device of `device_type`, plus `positions` relative to it.
    pub fn device_type<I, P>(self, device_type: impl Into<String>, positions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PositionRequest>,
    {
        self.with(DeviceSelector::ByType(device_type.into()), positions)
    }

    /// Request positions by full name prefix.
    pub fn positions<I, P>(self, positions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PositionRequest>,
    {
        self.with(DeviceSelector::Unowned, positions)
    }

    /// Add items to `selector`, creating the entry if needed.
    pub fn with<I, P>(mut self, selector: DeviceSelector, positions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PositionRequest>,
    {
        self.entries
            .entry(selector)
            .or_default()
            .extend(positions.into_iter().map(Into::into));
        self
    }

    /// Entries ordered: named devices, device types, unowned positions.
    pub fn entries(&self) -> impl Iterator<Item = (&DeviceSelector, &[PositionRequest])> {
        self.entries.iter().map(|(s, items)| (s, items.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check names and prefixes without touching the ledger.
    pub fn validate(&self) -> Result<()> {
        for (selector, items) in &self.entries {
            match selector {
                DeviceSelector::ByName(name) => validate_device_name(name)?,
                DeviceSelector::ByType(device_type) => validate_name("device type", device_type)?,
                DeviceSelector::Unowned => {}
            }

            let mut seen = HashSet::new();
            for item in items {
                if !seen.insert(item.prefix.as_str()) {
                    return Err(LabError::Validation(format!(
                        "duplicate prefix '{}' requested for {}",
                        item.prefix, selector
                    )));
                }
                NamePrefix::parse(&item.prefix)?;
                if item.prefix.is_empty() && *selector == DeviceSelector::Unowned {
                    return Err(LabError::Validation(
                        "an unowned position prefix must not be empty".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl TryFrom<Vec<RequestEntry>> for ResourceRequest {
    type Error = LabError;

    fn try_from(list: Vec<RequestEntry>) -> Result<Self> {
        let mut entries = BTreeMap::new();
        for entry in list {
            let selector = match (entry.device, entry.device_type) {
                (Some(_), Some(_)) => {
                    return Err(LabError::Validation(
                        "a request entry may name a device or a device type, not both".to_string(),
                    ));
                }
                (Some(name), None) => DeviceSelector::ByName(name),
                (None, Some(device_type)) => DeviceSelector::ByType(device_type),
                (None, None) => DeviceSelector::Unowned,
            };
            if entries.contains_key(&selector) {
                return Err(LabError::Validation(format!(
                    "{} appears more than once in the request",
                    selector
                )));
            }
            let items = entry.positions.into_iter().map(PositionRequest::from).collect();
            entries.insert(selector, items);
        }

        let request = ResourceRequest { entries };
        request.validate()?;
        Ok(request)
    }
}

impl From<ResourceRequest> for Vec<RequestEntry> {
    fn from(request: ResourceRequest) -> Self {
        request
            .entries
            .into_iter()
            .map(|(selector, items)| {
                let (device, device_type) = match selector {
                    DeviceSelector::ByName(name) => (Some(name), None),
                    DeviceSelector::ByType(device_type) => (None, Some(device_type)),
                    DeviceSelector::Unowned => (None, None),
                };
                RequestEntry {
                    device,
                    device_type,
                    positions: items.into_iter().map(PositionItem::Full).collect(),
                }
            })
            .collect()
    }
}
