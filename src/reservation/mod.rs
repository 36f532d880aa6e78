//! Reservation engine.
//!
//! Decides whether a request can be fully satisfied and commits ownership
//! all-or-nothing.
//!
//! # Decision Steps
//!
//! 1. Validate the request shape
//! 2. Capacity pre-check outside the lock: every prefix must match at least
//!    `number` positions in total, or the request can never succeed
//! 3. Acquire the decision lock (`reservation`)
//! 4. Select devices and positions against one occupancy snapshot
//! 5. Write owner = task on every newly taken resource, rolling back on failure
//! 6. Append the reserve event and release the lock
//!
//! Contention (enough resources exist, not enough are free) is reported as
//! [`ReserveOutcome::Unsatisfiable`], never as an error, so the wait broker
//! can retry it.

mod grant;
mod selection;
mod transaction;

pub use grant::{DeviceAssignment, Grant, GrantedPosition, RequestId};

use crate::error::{LabError, Result};
use crate::events::{Event, EventAction};
use crate::ledger::{Ledger, NamePrefix, TaskId};
use crate::matcher;
use crate::occupancy::{self, PositionStatus};
use crate::request::{DeviceSelector, PositionRequest, ResourceRequest};
use chrono::{DateTime, Utc};
use selection::Decision;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;
use transaction::OwnershipTransaction;

/// Result of one reservation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    Granted(Grant),
    /// Not enough resources are free right now.
    Unsatisfiable { reason: String },
}

impl ReserveOutcome {
    pub fn granted(self) -> Option<Grant> {
        match self {
            ReserveOutcome::Granted(grant) => Some(grant),
            ReserveOutcome::Unsatisfiable { .. } => None,
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, ReserveOutcome::Granted(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Position,
    Device,
}

/// A resource that has been locked by one task for longer than a threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleLock {
    pub kind: ResourceKind,
    pub name: String,
    pub task: TaskId,
    pub locked_since: DateTime<Utc>,
}

/// Reservation decisions over a shared [`Ledger`].
#[derive(Debug, Clone)]
pub struct ReservationEngine {
    ledger: Arc<Ledger>,
}

impl ReservationEngine {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Reserve positions by full name prefix.
    pub fn reserve_positions(
        &self,
        task: &TaskId,
        items: &[PositionRequest],
    ) -> Result<ReserveOutcome> {
        let request = ResourceRequest::new().positions(items.iter().cloned());
        self.reserve(task, &request)
    }

    /// Reserve a bundle of devices and positions for `task`.
    ///
    /// # Errors
    ///
    /// * `LabError::Validation` - malformed request
    /// * `LabError::Capacity` - a prefix can never match enough positions
    /// * `LabError::NotFound` - unknown device, device type or prefix
    /// * `LabError::Lock` - the decision lock was not acquired in time
    pub fn reserve(&self, task: &TaskId, request: &ResourceRequest) -> Result<ReserveOutcome> {
        self.check_request(request)?;

        let _decision = self.ledger.decision_lock("reserve")?;

        let selection = match selection::select(&self.ledger, task, request)? {
            Decision::Selected(selection) => selection,
            Decision::Unsatisfiable(reason) => {
                tracing::debug!(task = %task, %reason, "reservation unsatisfiable");
                return Ok(ReserveOutcome::Unsatisfiable { reason });
            }
        };

        let grant = Grant {
            request_id: RequestId::generate(),
            task_id: task.clone(),
            devices: selection.devices,
            positions: selection.positions,
        };
        self.commit(&grant)?;

        self.ledger.record(
            Event::new(EventAction::Reserve)
                .with_task(task)
                .with_details(json!({
                    "request_id": grant.request_id,
                    "devices": grant.device_names().collect::<Vec<_>>(),
                    "positions": grant.position_names().collect::<Vec<_>>(),
                })),
        );
        Ok(ReserveOutcome::Granted(grant))
    }

    /// Validation and capacity checks; these never change by waiting.
    pub fn check_request(&self, request: &ResourceRequest) -> Result<()> {
        request.validate()?;
        check_distinct_prefixes(request)?;

        for (selector, items) in request.entries() {
            match selector {
                DeviceSelector::Unowned => {
                    for item in items {
                        self.check_capacity(&NamePrefix::parse(&item.prefix)?, item.number)?;
                    }
                }
                DeviceSelector::ByName(name) => {
                    self.ledger.require_device(name)?;
                    for item in items {
                        let prefix = NamePrefix::under_device(name, &item.prefix)?;
                        self.check_capacity(&prefix, item.number)?;
                    }
                }
                DeviceSelector::ByType(device_type) => {
                    let devices = self.ledger.devices_of_type(device_type)?;
                    if devices.is_empty() {
                        return Err(LabError::NotFound(format!(
                            "no device of type '{}' is registered",
                            device_type
                        )));
                    }
                    let mut fits = false;
                    for device in &devices {
                        if self.device_fits(&device.name, items)? {
                            fits = true;
                            break;
                        }
                    }
                    if !fits {
                        return Err(LabError::Capacity(format!(
                            "no device of type '{}' has enough positions for the request",
                            device_type
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_capacity(&self, prefix: &NamePrefix, number: u32) -> Result<()> {
        let count = matcher::match_count(&self.ledger, prefix)?;
        if count < number as usize {
            return Err(LabError::Capacity(format!(
                "position prefix '{}' can only have {} matches, but requests {}",
                prefix, count, number
            )));
        }
        Ok(())
    }

    fn device_fits(&self, device: &str, items: &[PositionRequest]) -> Result<bool> {
        for item in items {
            let prefix = NamePrefix::under_device(device, &item.prefix)?;
            if matcher::match_count(&self.ledger, &prefix)? < item.number as usize {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn commit(&self, grant: &Grant) -> Result<()> {
        let mut transaction = OwnershipTransaction::new(&self.ledger);
        if let Err(e) = write_owners(&mut transaction, grant) {
            tracing::warn!(task = %grant.task_id, error = %e, "reservation commit failed, rolling back");
            transaction.rollback();
            return Err(e);
        }
        Ok(())
    }

    /// Clear the owner of every position and device `grant` newly took.
    ///
    /// Entries with `need_release == false` were already held by the task
    /// before this grant and stay locked. Idempotent. Resources that no
    /// longer exist are skipped.
    pub fn release(&self, grant: &Grant) -> Result<()> {
        let mut first_error = None;

        let positions = grant
            .positions
            .values()
            .flatten()
            .filter(|p| p.need_release)
            .map(|p| p.name.as_str());
        for name in positions {
            match self.ledger.set_position_owner(name, None) {
                Ok(_) => {}
                Err(LabError::NotFound(_)) => {
                    tracing::warn!(position = %name, "released position no longer exists");
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        let devices = grant
            .devices
            .iter()
            .filter(|a| a.need_release)
            .map(|a| a.device.as_str());
        for name in devices {
            match self.ledger.set_device_owner(name, None) {
                Ok(_) => {}
                Err(LabError::NotFound(_)) => {
                    tracing::warn!(device = %name, "released device no longer exists");
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        self.ledger.record(
            Event::new(EventAction::Release)
                .with_task(&grant.task_id)
                .with_details(json!({"request_id": grant.request_id})),
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Lock a single position for `task`.
    ///
    /// A no-op if `task` already holds it. Fails with `LabError::Ownership`
    /// when another task holds it or a sample of another task sits in it.
    pub fn lock_one(&self, task: &TaskId, position: &str) -> Result<()> {
        let _decision = self.ledger.decision_lock("lock_position")?;

        if self.ledger.require_position(position)?.task_id.as_ref() == Some(task) {
            return Ok(());
        }

        let occupancy = occupancy::status(&self.ledger, position)?;
        if occupancy.task.as_ref() != Some(task) {
            match occupancy.status {
                PositionStatus::Occupied => {
                    return Err(LabError::Ownership(format!(
                        "position '{}' is currently occupied",
                        position
                    )));
                }
                PositionStatus::Locked => {
                    return Err(LabError::Ownership(format!(
                        "position '{}' is currently locked by task {}",
                        position,
                        occupancy.task.as_ref().map(TaskId::as_str).unwrap_or("?")
                    )));
                }
                PositionStatus::Empty => {}
            }
        }

        self.ledger.set_position_owner(position, Some(task))?;
        self.ledger.record(
            Event::new(EventAction::LockPosition)
                .with_task(task)
                .with_details(json!({"position": position})),
        );
        Ok(())
    }

    /// Clear the owner of one position, whoever holds it.
    pub fn release_one(&self, position: &str) -> Result<()> {
        let previous = self.ledger.require_position(position)?.task_id;
        self.ledger.set_position_owner(position, None)?;
        let mut event =
            Event::new(EventAction::ReleasePosition).with_details(json!({"position": position}));
        if let Some(task) = previous {
            event = event.with_task(task);
        }
        self.ledger.record(event);
        Ok(())
    }

    /// The single parent device of every position matching `prefix`.
    ///
    /// `Ok(None)` when the matching positions belong to no device.
    ///
    /// # Errors
    ///
    /// * `LabError::NotFound` - nothing matches `prefix`
    /// * `LabError::Ambiguity` - the matches belong to several devices
    pub fn parent_device(&self, prefix: &str) -> Result<Option<String>> {
        let prefix = NamePrefix::parse(prefix)?;
        let records = self.ledger.positions_with_prefix(&prefix)?;
        if records.is_empty() {
            return Err(matcher::no_match(&prefix));
        }

        let parents: BTreeSet<Option<String>> =
            records.into_iter().map(|r| r.parent_device).collect();
        if parents.len() > 1 {
            let listed: Vec<&str> = parents
                .iter()
                .map(|p| p.as_deref().unwrap_or("<none>"))
                .collect();
            return Err(LabError::Ambiguity(format!(
                "positions starting with '{}' belong to several devices ({}); use a more specific prefix",
                prefix,
                listed.join(", ")
            )));
        }
        Ok(parents.into_iter().next().flatten())
    }

    /// Names of the positions `task` currently holds.
    pub fn positions_locked_by(&self, task: &TaskId) -> Result<Vec<String>> {
        Ok(self
            .ledger
            .positions_owned_by(task)?
            .into_iter()
            .map(|p| p.name)
            .collect())
    }

    /// Positions and devices locked for longer than `threshold`.
    pub fn stale_locks(&self, threshold: chrono::Duration) -> Result<Vec<StaleLock>> {
        let cutoff = Utc::now() - threshold;
        let mut stale = Vec::new();

        for position in self.ledger.positions()? {
            if let Some(task) = position.task_id
                && position.last_updated < cutoff
            {
                stale.push(StaleLock {
                    kind: ResourceKind::Position,
                    name: position.name,
                    task,
                    locked_since: position.last_updated,
                });
            }
        }
        for device in self.ledger.devices()? {
            if let Some(task) = device.task_id
                && device.last_updated < cutoff
            {
                stale.push(StaleLock {
                    kind: ResourceKind::Device,
                    name: device.name,
                    task,
                    locked_since: device.last_updated,
                });
            }
        }
        Ok(stale)
    }

    /// Release everything `task` holds, e.g. after its process crashed.
    ///
    /// Returns the names of the positions and devices that were cleared.
    pub fn reclaim_task(&self, task: &TaskId) -> Result<Vec<String>> {
        let _decision = self.ledger.decision_lock("reclaim")?;

        let mut cleared = Vec::new();
        for position in self.ledger.positions_owned_by(task)? {
            self.ledger.set_position_owner(&position.name, None)?;
            cleared.push(position.name);
        }
        for device in self.ledger.devices_owned_by(task)? {
            self.ledger.set_device_owner(&device.name, None)?;
            cleared.push(device.name);
        }

        if !cleared.is_empty() {
            tracing::info!(task = %task, count = cleared.len(), "reclaimed locks of task");
            self.ledger.record(
                Event::new(EventAction::Reclaim)
                    .with_task(task)
                    .with_details(json!({"cleared": cleared})),
            );
        }
        Ok(cleared)
    }
}

/// Prefixes must be pairwise distinct once resolved against their device.
///
/// Device types are resolved during selection, which keeps their prefixes
/// clear of these.
fn check_distinct_prefixes(request: &ResourceRequest) -> Result<()> {
    let mut seen = BTreeSet::new();
    for (selector, items) in request.entries() {
        for item in items {
            let resolved = match selector {
                DeviceSelector::ByName(name) => NamePrefix::under_device(name, &item.prefix)?,
                DeviceSelector::Unowned => NamePrefix::parse(&item.prefix)?,
                DeviceSelector::ByType(_) => continue,
            };
            if !seen.insert(resolved.as_str().to_string()) {
                return Err(LabError::Validation(format!(
                    "prefix '{}' is requested more than once ({})",
                    resolved, selector
                )));
            }
        }
    }
    Ok(())
}

fn write_owners(transaction: &mut OwnershipTransaction<'_>, grant: &Grant) -> Result<()> {
    for assignment in grant.devices.iter().filter(|a| a.need_release) {
        transaction.lock_device(&assignment.device, &grant.task_id)?;
    }
    for position in grant.positions.values().flatten().filter(|p| p.need_release) {
        transaction.lock_position(&position.name, &grant.task_id)?;
    }
    Ok(())
}
