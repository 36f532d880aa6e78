//! Rollback log for committing a grant.

use crate::error::Result;
use crate::ledger::{Ledger, TaskId};

/// Owner writes made while committing a grant, undone if a later write fails.
pub(super) struct OwnershipTransaction<'a> {
    ledger: &'a Ledger,
    positions: Vec<String>,
    devices: Vec<String>,
}

impl<'a> OwnershipTransaction<'a> {
    pub fn new(ledger: &'a Ledger) -> Self {
        Self {
            ledger,
            positions: Vec::new(),
            devices: Vec::new(),
        }
    }

    pub fn lock_position(&mut self, name: &str, task: &TaskId) -> Result<()> {
        self.ledger.set_position_owner(name, Some(task))?;
        self.positions.push(name.to_string());
        Ok(())
    }

    pub fn lock_device(&mut self, name: &str, task: &TaskId) -> Result<()> {
        self.ledger.set_device_owner(name, Some(task))?;
        self.devices.push(name.to_string());
        Ok(())
    }

    /// Clear every owner written so far. Only free resources are ever
    /// written, so clearing restores the previous state.
    pub fn rollback(self) {
        for name in self.positions.iter().rev() {
            if let Err(e) = self.ledger.set_position_owner(name, None) {
                tracing::warn!(position = %name, error = %e, "failed to roll back position owner");
            }
        }
        for name in self.devices.iter().rev() {
            if let Err(e) = self.ledger.set_device_owner(name, None) {
                tracing::warn!(device = %name, error = %e, "failed to roll back device owner");
            }
        }
    }
}
