//! Positions collection.

use super::Ledger;
use super::path::NamePrefix;
use super::records::{PositionRecord, PositionTemplate, TaskId};
use crate::error::{LabError, Result};
use crate::events::{Event, EventAction};
use crate::store::Collection;
use chrono::Utc;
use serde_json::json;

impl Ledger {
    /// Create the positions declared by `templates`.
    ///
    /// Every name is validated before anything is written. Names that
    /// already exist are skipped, so registration is idempotent.
    ///
    /// # Returns
    ///
    /// The names that were newly created.
    pub fn add_positions(
        &self,
        templates: &[PositionTemplate],
        parent_device: Option<&str>,
    ) -> Result<Vec<String>> {
        let mut planned = Vec::new();
        for template in templates {
            for path in template.expand(parent_device)? {
                planned.push((path, template.description.clone()));
            }
        }

        let mut created = Vec::new();
        for (path, description) in planned {
            let record = PositionRecord {
                name: path.as_str().to_string(),
                parent_device: parent_device.map(str::to_string),
                description,
                task_id: None,
                last_updated: Utc::now(),
            };
            if self.insert(Collection::Positions, path.as_str(), &record)? {
                created.push(path.into_string());
            }
        }

        if !created.is_empty() {
            self.record(
                Event::new(EventAction::RegisterPositions).with_details(json!({
                    "parent_device": parent_device,
                    "positions": created,
                })),
            );
        }
        Ok(created)
    }

    pub fn position(&self, name: &str) -> Result<Option<PositionRecord>> {
        self.load(Collection::Positions, name)
    }

    /// Like [`Ledger::position`], but an unknown name is an error.
    pub fn require_position(&self, name: &str) -> Result<PositionRecord> {
        self.position(name)?
            .ok_or_else(|| LabError::NotFound(format!("position '{}' does not exist", name)))
    }

    /// Positions whose name starts with `prefix`, ordered by name.
    pub fn positions_with_prefix(&self, prefix: &NamePrefix) -> Result<Vec<PositionRecord>> {
        self.scan(Collection::Positions, prefix.as_str())
    }

    pub fn positions(&self) -> Result<Vec<PositionRecord>> {
        self.scan(Collection::Positions, "")
    }

    /// Set (or clear, with `None`) the lock owner of one position.
    pub fn set_position_owner(&self, name: &str, owner: Option<&TaskId>) -> Result<PositionRecord> {
        self.update(Collection::Positions, name, |record: &mut PositionRecord| {
            record.task_id = owner.cloned();
            record.last_updated = Utc::now();
            Ok(())
        })?
        .ok_or_else(|| LabError::NotFound(format!("position '{}' does not exist", name)))
    }

    /// Positions currently locked by `task`, ordered by name.
    pub fn positions_owned_by(&self, task: &TaskId) -> Result<Vec<PositionRecord>> {
        Ok(self
            .positions()?
            .into_iter()
            .filter(|p| p.task_id.as_ref() == Some(task))
            .collect())
    }

    /// Drop the whole positions collection.
    pub fn reset_positions(&self) -> Result<()> {
        self.store().clear(Collection::Positions)?;
        self.record(Event::new(EventAction::ResetPositions));
        Ok(())
    }
}
