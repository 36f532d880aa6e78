//! Choice of concrete devices and positions for one request.
//!
//! Runs under the decision lock against a single occupancy snapshot. Nothing
//! here writes to the ledger.

use super::grant::{DeviceAssignment, GrantedPosition};
use crate::error::{LabError, Result};
use crate::ledger::{DeviceRecord, Ledger, NamePrefix, TaskId};
use crate::matcher;
use crate::request::{DeviceSelector, PositionRequest, ResourceRequest};
use std::collections::{BTreeMap, HashMap, HashSet};

/// `Err(reason)` when the request cannot be satisfied right now.
type Attempt<T> = std::result::Result<T, String>;

#[derive(Debug, Default)]
pub(super) struct Selection {
    pub devices: Vec<DeviceAssignment>,
    pub positions: BTreeMap<String, Vec<GrantedPosition>>,
}

pub(super) enum Decision {
    Selected(Selection),
    Unsatisfiable(String),
}

type Picked = Vec<(NamePrefix, Vec<GrantedPosition>)>;

struct Picker<'a> {
    ledger: &'a Ledger,
    task: &'a TaskId,
    occupied: HashMap<String, Option<TaskId>>,
    /// Resolved prefixes of named devices and unowned items.
    fixed_prefixes: HashSet<String>,
    taken_positions: HashSet<String>,
    taken_devices: HashSet<String>,
    selection: Selection,
}

/// Pick devices and positions for every entry of `request`.
///
/// Named devices are resolved first, then device types, then unowned
/// positions. A position or device chosen for one entry is never offered to
/// a later one.
pub(super) fn select(ledger: &Ledger, task: &TaskId, request: &ResourceRequest) -> Result<Decision> {
    let mut picker = Picker {
        ledger,
        task,
        occupied: ledger.occupied_positions()?,
        fixed_prefixes: fixed_prefixes(request)?,
        taken_positions: HashSet::new(),
        taken_devices: HashSet::new(),
        selection: Selection::default(),
    };

    for (selector, items) in request.entries() {
        let attempt = match selector {
            DeviceSelector::ByName(name) => picker.pick_named(selector, name, items)?,
            DeviceSelector::ByType(device_type) => picker.pick_typed(selector, device_type, items)?,
            DeviceSelector::Unowned => picker
                .pick_positions(None, items)?
                .map(|picked| picker.accept(picked)),
        };
        if let Err(reason) = attempt {
            return Ok(Decision::Unsatisfiable(reason));
        }
    }

    Ok(Decision::Selected(picker.selection))
}

fn fixed_prefixes(request: &ResourceRequest) -> Result<HashSet<String>> {
    let mut fixed = HashSet::new();
    for (selector, items) in request.entries() {
        for item in items {
            let prefix = match selector {
                DeviceSelector::ByName(name) => NamePrefix::under_device(name, &item.prefix)?,
                DeviceSelector::Unowned => NamePrefix::parse(&item.prefix)?,
                DeviceSelector::ByType(_) => continue,
            };
            fixed.insert(prefix.as_str().to_string());
        }
    }
    Ok(fixed)
}

impl Picker<'_> {
    fn is_free_for_task(&self, device: &DeviceRecord) -> bool {
        device.task_id.is_none() || device.task_id.as_ref() == Some(self.task)
    }

    fn pick_named(
        &mut self,
        selector: &DeviceSelector,
        name: &str,
        items: &[PositionRequest],
    ) -> Result<Attempt<()>> {
        let device = self.ledger.require_device(name)?;
        if !self.is_free_for_task(&device) || self.taken_devices.contains(name) {
            return Ok(Err(format!(
                "device '{}' is in use by task {}",
                name,
                device.task_id.as_ref().map(TaskId::as_str).unwrap_or("?")
            )));
        }

        Ok(self.pick_positions(Some(name), items)?.map(|picked| {
            self.accept(picked);
            self.assign(selector, &device);
        }))
    }

    fn pick_typed(
        &mut self,
        selector: &DeviceSelector,
        device_type: &str,
        items: &[PositionRequest],
    ) -> Result<Attempt<()>> {
        let mut devices = self.ledger.devices_of_type(device_type)?;
        if devices.is_empty() {
            return Err(LabError::NotFound(format!(
                "no device of type '{}' is registered",
                device_type
            )));
        }

        devices.retain(|d| self.is_free_for_task(d) && !self.taken_devices.contains(&d.name));
        // Devices the task already holds first; the sort is stable, so name order stays.
        devices.sort_by_key(|d| d.task_id.as_ref() != Some(self.task));

        for device in devices {
            if self.collides_with_fixed(&device.name, items)? {
                continue;
            }
            if let Ok(picked) = self.pick_positions(Some(&device.name), items)? {
                self.accept(picked);
                self.assign(selector, &device);
                return Ok(Ok(()));
            }
        }

        Ok(Err(format!(
            "no free device of type '{}' can satisfy the request",
            device_type
        )))
    }

    fn collides_with_fixed(&self, device: &str, items: &[PositionRequest]) -> Result<bool> {
        for item in items {
            let prefix = NamePrefix::under_device(device, &item.prefix)?;
            if self.fixed_prefixes.contains(prefix.as_str()) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Choose positions for `items`, relative to `device` when given.
    ///
    /// Candidates already owned by the task come first, then take `number`.
    fn pick_positions(
        &self,
        device: Option<&str>,
        items: &[PositionRequest],
    ) -> Result<Attempt<Picked>> {
        let mut taken_here: HashSet<String> = HashSet::new();
        let mut picked = Vec::with_capacity(items.len());

        for item in items {
            let prefix = match device {
                Some(device) => NamePrefix::under_device(device, &item.prefix)?,
                None => NamePrefix::parse(&item.prefix)?,
            };
            let wanted = item.number as usize;
            if wanted == 0 {
                picked.push((prefix, Vec::new()));
                continue;
            }

            let records = self.ledger.positions_with_prefix(&prefix)?;
            if records.is_empty() {
                if device.is_some() {
                    return Ok(Err(format!("no position name starts with '{}'", prefix)));
                }
                return Err(matcher::no_match(&prefix));
            }

            let mut found: Vec<GrantedPosition> =
                matcher::candidates_in(&records, &self.occupied, self.task)
                    .into_iter()
                    .filter(|c| {
                        !self.taken_positions.contains(&c.name) && !taken_here.contains(&c.name)
                    })
                    .collect();
            if found.len() < wanted {
                return Ok(Err(format!(
                    "prefix '{}' has {} available position(s), {} requested",
                    prefix,
                    found.len(),
                    wanted
                )));
            }

            found.sort_by_key(|c| c.need_release);
            found.truncate(wanted);
            taken_here.extend(found.iter().map(|c| c.name.clone()));
            picked.push((prefix, found));
        }

        Ok(Ok(picked))
    }

    fn accept(&mut self, picked: Picked) {
        for (prefix, found) in picked {
            self.taken_positions
                .extend(found.iter().map(|c| c.name.clone()));
            self.selection
                .positions
                .entry(prefix.as_str().to_string())
                .or_default()
                .extend(found);
        }
    }

    fn assign(&mut self, selector: &DeviceSelector, device: &DeviceRecord) {
        self.taken_devices.insert(device.name.clone());
        self.selection.devices.push(DeviceAssignment {
            selector: selector.clone(),
            device: device.name.clone(),
            need_release: device.task_id.as_ref() != Some(self.task),
        });
    }
}
