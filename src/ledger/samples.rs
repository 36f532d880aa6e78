//! Samples collection.

use super::Ledger;
use super::path::validate_name;
use super::records::{NewSample, SampleId, SampleRecord, TaskId};
use crate::error::{LabError, Result};
use crate::events::{Event, EventAction};
use crate::occupancy::{self, PositionStatus};
use crate::store::Collection;
use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;

impl Ledger {
    /// Create a sample, optionally placed in a position.
    ///
    /// The position must exist, hold no sample, and not be locked by a task
    /// other than the new sample's owner. Sample names may repeat; ids may not.
    pub fn create_sample(&self, new: NewSample) -> Result<SampleRecord> {
        validate_name("sample name", &new.name)?;
        let id = match new.id {
            Some(id) => {
                validate_name("sample id", id.as_str())?;
                id
            }
            None => SampleId::generate(),
        };

        let _decision = match &new.position {
            Some(position) => {
                let lock = self.decision_lock("create_sample")?;
                let occupancy = occupancy::status(self, position)?;
                match occupancy.status {
                    PositionStatus::Occupied => {
                        return Err(LabError::Ownership(format!(
                            "position '{}' already holds a sample",
                            position
                        )));
                    }
                    PositionStatus::Locked if occupancy.task != new.owner => {
                        return Err(LabError::Ownership(format!(
                            "position '{}' is locked by task {}",
                            position,
                            occupancy.task.as_ref().map(TaskId::as_str).unwrap_or("?")
                        )));
                    }
                    _ => {}
                }
                Some(lock)
            }
            None => None,
        };

        let now = Utc::now();
        let record = SampleRecord {
            id: id.clone(),
            name: new.name,
            position: new.position,
            task_id: new.owner,
            tags: new.tags,
            metadata: new.metadata,
            created_at: now,
            last_updated: now,
        };
        if !self.insert(Collection::Samples, id.as_str(), &record)? {
            return Err(LabError::Validation(format!(
                "sample id '{}' already exists",
                id
            )));
        }

        let mut event = Event::new(EventAction::CreateSample).with_details(json!({
            "sample": record.id,
            "name": record.name,
            "position": record.position,
        }));
        if let Some(task) = &record.task_id {
            event = event.with_task(task);
        }
        self.record(event);
        Ok(record)
    }

    pub fn sample(&self, id: &SampleId) -> Result<Option<SampleRecord>> {
        self.load(Collection::Samples, id.as_str())
    }

    pub fn require_sample(&self, id: &SampleId) -> Result<SampleRecord> {
        self.sample(id)?
            .ok_or_else(|| LabError::NotFound(format!("sample '{}' does not exist", id)))
    }

    pub fn samples(&self) -> Result<Vec<SampleRecord>> {
        self.scan(Collection::Samples, "")
    }

    /// The sample sitting in `position`, if any.
    pub fn sample_at(&self, position: &str) -> Result<Option<SampleRecord>> {
        Ok(self
            .samples()?
            .into_iter()
            .find(|s| s.position.as_deref() == Some(position)))
    }

    pub fn samples_owned_by(&self, task: &TaskId) -> Result<Vec<SampleRecord>> {
        Ok(self
            .samples()?
            .into_iter()
            .filter(|s| s.task_id.as_ref() == Some(task))
            .collect())
    }

    /// Every position that holds a sample, with the owner of that sample.
    pub fn occupied_positions(&self) -> Result<HashMap<String, Option<TaskId>>> {
        Ok(self
            .samples()?
            .into_iter()
            .filter_map(|s| s.position.map(|p| (p, s.task_id)))
            .collect())
    }

    /// Hand a sample to another task (or to none).
    pub fn set_sample_owner(&self, id: &SampleId, owner: Option<&TaskId>) -> Result<SampleRecord> {
        let record = self
            .update(Collection::Samples, id.as_str(), |record: &mut SampleRecord| {
                record.task_id = owner.cloned();
                record.last_updated = Utc::now();
                Ok(())
            })?
            .ok_or_else(|| LabError::NotFound(format!("sample '{}' does not exist", id)))?;

        self.record(
            Event::new(EventAction::TransferSample)
                .with_details(json!({"sample": id, "task_id": owner})),
        );
        Ok(record)
    }

    /// Move a sample to `destination` (or out of the lab with `None`).
    ///
    /// A no-op when the sample is already there. The destination must exist
    /// and hold no sample. Task ownership is checked by the caller.
    pub fn move_sample(&self, id: &SampleId, destination: Option<&str>) -> Result<SampleRecord> {
        let _decision = self.decision_lock("move_sample")?;

        let sample = self.require_sample(id)?;
        if sample.position.as_deref() == destination {
            return Ok(sample);
        }

        if let Some(position) = destination
            && !occupancy::is_unoccupied(self, position)?
        {
            return Err(LabError::Ownership(format!(
                "position '{}' already holds a sample",
                position
            )));
        }

        let from = sample.position.clone();
        let record = self
            .update(Collection::Samples, id.as_str(), |record: &mut SampleRecord| {
                record.position = destination.map(str::to_string);
                record.last_updated = Utc::now();
                Ok(())
            })?
            .ok_or_else(|| LabError::NotFound(format!("sample '{}' does not exist", id)))?;

        let mut event = Event::new(EventAction::MoveSample).with_details(json!({
            "sample": id,
            "from": from,
            "to": destination,
        }));
        if let Some(task) = &record.task_id {
            event = event.with_task(task);
        }
        self.record(event);
        Ok(record)
    }
}
