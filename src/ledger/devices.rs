//! Devices collection.

use super::Ledger;
use super::path::{validate_device_name, validate_name};
use super::records::{DeviceDefinition, DeviceRecord, TaskId};
use crate::error::{LabError, Result};
use crate::events::{Event, EventAction};
use crate::store::Collection;
use chrono::Utc;
use serde_json::json;

impl Ledger {
    /// Register a device and its positions.
    ///
    /// Idempotent: an existing device is left as is and only its missing
    /// positions are added. Returns true if the device record was created.
    pub fn register_device(&self, definition: &DeviceDefinition) -> Result<bool> {
        validate_device_name(&definition.name)?;
        validate_name("device type", &definition.device_type)?;
        for template in &definition.positions {
            template.expand(Some(&definition.name))?;
        }

        let record = DeviceRecord {
            name: definition.name.clone(),
            device_type: definition.device_type.clone(),
            description: definition.description.clone(),
            task_id: None,
            last_updated: Utc::now(),
        };
        let created = self.insert(Collection::Devices, &definition.name, &record)?;
        if created {
            self.record(
                Event::new(EventAction::RegisterDevice).with_details(json!({
                    "device": definition.name,
                    "device_type": definition.device_type,
                })),
            );
        }

        self.add_positions(&definition.positions, Some(&definition.name))?;
        Ok(created)
    }

    pub fn device(&self, name: &str) -> Result<Option<DeviceRecord>> {
        self.load(Collection::Devices, name)
    }

    pub fn require_device(&self, name: &str) -> Result<DeviceRecord> {
        self.device(name)?
            .ok_or_else(|| LabError::NotFound(format!("device '{}' does not exist", name)))
    }

    pub fn devices(&self) -> Result<Vec<DeviceRecord>> {
        self.scan(Collection::Devices, "")
    }

    /// Devices of one type, ordered by name.
    pub fn devices_of_type(&self, device_type: &str) -> Result<Vec<DeviceRecord>> {
        Ok(self
            .devices()?
            .into_iter()
            .filter(|d| d.device_type == device_type)
            .collect())
    }

    pub fn set_device_owner(&self, name: &str, owner: Option<&TaskId>) -> Result<DeviceRecord> {
        self.update(Collection::Devices, name, |record: &mut DeviceRecord| {
            record.task_id = owner.cloned();
            record.last_updated = Utc::now();
            Ok(())
        })?
        .ok_or_else(|| LabError::NotFound(format!("device '{}' does not exist", name)))
    }

    pub fn devices_owned_by(&self, task: &TaskId) -> Result<Vec<DeviceRecord>> {
        Ok(self
            .devices()?
            .into_iter()
            .filter(|d| d.task_id.as_ref() == Some(task))
            .collect())
    }
}
