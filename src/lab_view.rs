//! Task-facing view of the lab.
//!
//! A [`LabView`] is bound to one task. It requests resource bundles through
//! the lab's transport and hands them out as a [`ResourceScope`], which
//! releases its grant when dropped: on normal return, on an early `?` return,
//! and while unwinding from a panic.

use crate::collaborators::{DeviceClient, TaskStatus};
use crate::error::{LabError, Result};
use crate::lab::Lab;
use crate::ledger::{NewSample, SampleId, SampleRecord, TaskId};
use crate::occupancy::{self, Occupancy, PositionStatus};
use crate::request::{DeviceSelector, Priority, ResourceRequest};
use crate::reservation::{Grant, GrantedPosition};
use crate::transport::ResourceTransport;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Resources held by a task until the scope is released or dropped.
pub struct ResourceScope<H> {
    transport: Arc<dyn ResourceTransport>,
    grant: Grant,
    devices: BTreeMap<String, H>,
    released: bool,
}

impl<H> ResourceScope<H> {
    pub fn grant(&self) -> &Grant {
        &self.grant
    }

    /// Handle of the device chosen for `selector`.
    pub fn device(&self, selector: &DeviceSelector) -> Option<&H> {
        self.devices.get(self.grant.device(selector)?)
    }

    pub fn device_named(&self, name: &str) -> Option<&H> {
        self.devices.get(name)
    }

    /// Positions granted for `prefix` under `selector`; empty if none.
    pub fn positions(&self, selector: &DeviceSelector, prefix: &str) -> &[GrantedPosition] {
        self.grant.positions_for(selector, prefix).unwrap_or(&[])
    }

    pub fn position_names(&self) -> Vec<&str> {
        self.grant.position_names().collect()
    }

    /// Release now and report failure instead of only logging it.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.transport.release_resources(&self.grant.request_id)
    }
}

impl<H> Drop for ResourceScope<H> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.transport.release_resources(&self.grant.request_id) {
            tracing::warn!(
                task = %self.grant.task_id,
                request_id = %self.grant.request_id,
                error = %e,
                "failed to release resources on scope exit"
            );
        }
    }
}

impl<H> std::fmt::Debug for ResourceScope<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceScope")
            .field("grant", &self.grant)
            .field("released", &self.released)
            .finish()
    }
}

/// The lab as seen by one task.
pub struct LabView<D: DeviceClient> {
    task_id: TaskId,
    lab: Arc<Lab<D>>,
}

impl<D: DeviceClient> std::fmt::Debug for LabView<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LabView").field("task_id", &self.task_id).finish()
    }
}

impl<D: DeviceClient> LabView<D> {
    /// # Errors
    ///
    /// `LabError::NotFound` if the coordinator does not know `task_id`.
    pub fn new(task_id: TaskId, lab: Arc<Lab<D>>) -> Result<Self> {
        lab.coordinator().get_task(&task_id)?;
        Ok(Self { task_id, lab })
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn lab(&self) -> &Arc<Lab<D>> {
        &self.lab
    }

    /// Block until `request` is granted, then wrap every granted device.
    ///
    /// `priority` defaults to the configured one; `timeout` of `None` waits
    /// indefinitely.
    pub fn request_resources(
        &self,
        request: &ResourceRequest,
        priority: Option<Priority>,
        timeout: Option<Duration>,
    ) -> Result<ResourceScope<D::Handle>> {
        let priority = priority.unwrap_or_else(|| self.lab.config().default_priority());
        self.signal(TaskStatus::RequestingResources)?;

        let grant = self
            .lab
            .transport()
            .request_resources(&self.task_id, request, priority, timeout)?;
        let device_names: Vec<String> = grant.device_names().map(str::to_string).collect();
        let mut scope = ResourceScope {
            transport: Arc::clone(self.lab.transport()),
            grant,
            devices: BTreeMap::new(),
            released: false,
        };

        // An early return drops `scope`, which releases the grant.
        for name in device_names {
            let handle = self.lab.devices().wrapper_for(&name)?;
            scope.devices.insert(name, handle);
        }

        self.signal(TaskStatus::Running)?;
        Ok(scope)
    }

    /// Run `body` with the requested resources, releasing them on every exit.
    pub fn with_resources<T, F>(
        &self,
        request: &ResourceRequest,
        priority: Option<Priority>,
        timeout: Option<Duration>,
        body: F,
    ) -> Result<T>
    where
        F: FnOnce(&ResourceScope<D::Handle>) -> Result<T>,
    {
        let scope = self.request_resources(request, priority, timeout)?;
        let result = body(&scope);
        let released = scope.release();
        let value = result?;
        released?;
        Ok(value)
    }

    /// Move one of this task's samples to `destination`, or out of the lab.
    ///
    /// The destination must be locked by this task and hold no sample.
    pub fn move_sample(&self, id: &SampleId, destination: Option<&str>) -> Result<SampleRecord> {
        let ledger = self.lab.ledger();
        let sample = ledger.require_sample(id)?;
        if sample.task_id.as_ref() != Some(&self.task_id) {
            return Err(LabError::Ownership(format!(
                "sample '{}' is not owned by task {}",
                id, self.task_id
            )));
        }
        if sample.position.as_deref() == destination {
            return Ok(sample);
        }

        if let Some(position) = destination {
            let occupancy = occupancy::status(ledger, position)?;
            let locked_by_us = occupancy.status == PositionStatus::Locked
                && occupancy.task.as_ref() == Some(&self.task_id);
            if !locked_by_us {
                return Err(LabError::Ownership(format!(
                    "position '{}' is {} and not locked by task {}; lock it before moving samples in",
                    position, occupancy.status, self.task_id
                )));
            }
        }

        ledger.move_sample(id, destination)
    }

    /// Create a sample owned by this task unless `new` names another owner.
    pub fn create_sample(&self, mut new: NewSample) -> Result<SampleRecord> {
        if new.owner.is_none() {
            new.owner = Some(self.task_id.clone());
        }
        self.lab.ledger().create_sample(new)
    }

    pub fn get_sample(&self, id: &SampleId) -> Result<SampleRecord> {
        self.lab.ledger().require_sample(id)
    }

    /// Samples of this task that currently sit in a position.
    pub fn located_samples_for_task(&self) -> Result<Vec<SampleRecord>> {
        Ok(self
            .lab
            .ledger()
            .samples_owned_by(&self.task_id)?
            .into_iter()
            .filter(|s| s.position.is_some())
            .collect())
    }

    pub fn locked_positions(&self) -> Result<Vec<String>> {
        self.lab.engine().positions_locked_by(&self.task_id)
    }

    pub fn parent_device(&self, prefix: &str) -> Result<Option<String>> {
        self.lab.engine().parent_device(prefix)
    }

    pub fn position_status(&self, position: &str) -> Result<Occupancy> {
        occupancy::status(self.lab.ledger(), position)
    }

    fn signal(&self, status: TaskStatus) -> Result<()> {
        self.lab.coordinator().update_status(&self.task_id, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::PositionRequest;
    use crate::test_support::{FakeDeviceClient, TestLab, seeded_lab, seeded_lab_with};
    use std::panic::{AssertUnwindSafe, catch_unwind};

    fn view(test: &TestLab, task: &str) -> LabView<FakeDeviceClient> {
        LabView::new(TaskId::new(task), Arc::clone(&test.lab)).unwrap()
    }

    fn a(number: u32) -> ResourceRequest {
        ResourceRequest::new().positions([PositionRequest::new("A", number)])
    }

    fn oven_tray() -> ResourceRequest {
        ResourceRequest::new().device("oven", [PositionRequest::new("tray", 2)])
    }

    fn nothing_locked(test: &TestLab) -> bool {
        let ledger = test.lab.ledger();
        ledger.positions().unwrap().iter().all(|p| p.task_id.is_none())
            && ledger.devices().unwrap().iter().all(|d| d.task_id.is_none())
    }

    const PATIENCE: Option<Duration> = Some(Duration::from_secs(2));

    fn crash(scope: &ResourceScope<String>) {
        panic!("task crashed while holding {:?}", scope.position_names());
    }

    #[test]
    fn test_unknown_task_is_rejected() {
        let test = seeded_lab(&[]);
        let err = LabView::new(TaskId::new("ghost"), Arc::clone(&test.lab)).unwrap_err();
        assert!(matches!(err, LabError::NotFound(_)));
    }

    #[test]
    fn test_request_signals_status_and_wraps_devices() {
        let test = seeded_lab(&["T1"]);
        let view = view(&test, "T1");

        let scope = view.request_resources(&oven_tray(), None, PATIENCE).unwrap();
        let oven = DeviceSelector::ByName("oven".to_string());
        assert_eq!(scope.device(&oven).map(String::as_str), Some("oven"));
        assert_eq!(scope.device_named("oven").map(String::as_str), Some("oven"));
        assert_eq!(scope.positions(&oven, "tray").len(), 2);
        assert!(scope.positions(&DeviceSelector::Unowned, "A").is_empty());
        assert_eq!(test.lab.devices().wrapped(), vec!["oven"]);
        assert_eq!(
            test.coordinator.history(view.task_id()),
            vec![
                TaskStatus::Waiting,
                TaskStatus::RequestingResources,
                TaskStatus::Running
            ]
        );

        scope.release().unwrap();
        assert!(nothing_locked(&test));
    }

    #[test]
    fn test_scope_drop_releases_every_grant_size() {
        let test = seeded_lab(&["T1"]);
        let view = view(&test, "T1");

        for number in 0..=3 {
            {
                let scope = view.request_resources(&a(number), None, PATIENCE).unwrap();
                assert_eq!(scope.position_names().len(), number as usize);
                assert_eq!(view.locked_positions().unwrap().len(), number as usize);
            }
            assert!(nothing_locked(&test), "grant of {} was not released", number);
        }
    }

    #[test]
    fn test_nested_scope_keeps_outer_locks() {
        let test = seeded_lab(&["T1", "T2"]);
        let t1 = view(&test, "T1");
        let request = ResourceRequest::new()
            .device("oven", [PositionRequest::new("tray", 1)])
            .positions([PositionRequest::new("A", 2)]);

        let outer = t1.request_resources(&request, None, PATIENCE).unwrap();
        {
            let inner = t1.request_resources(&request, None, PATIENCE).unwrap();
            assert_eq!(inner.position_names(), outer.position_names());
        }
        assert_eq!(t1.locked_positions().unwrap().len(), 3);

        let t2 = view(&test, "T2");
        let err = t2
            .request_resources(&a(2), None, Some(Duration::from_millis(50)))
            .unwrap_err();
        assert!(matches!(err, LabError::Timeout(_)));

        drop(outer);
        assert!(nothing_locked(&test));
    }

    #[test]
    fn test_error_exit_releases() {
        let test = seeded_lab(&["T1"]);
        let view = view(&test, "T1");

        let result: Result<()> = view.with_resources(&oven_tray(), None, PATIENCE, |scope| {
            assert_eq!(scope.position_names().len(), 2);
            Err(LabError::Validation("experiment aborted".to_string()))
        });
        assert!(matches!(result, Err(LabError::Validation(_))));
        assert!(nothing_locked(&test));
    }

    #[test]
    fn test_panic_exit_releases() {
        let test = seeded_lab(&["T1"]);
        let view = view(&test, "T1");

        for number in 0..=3 {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                let scope = view.request_resources(&a(number), None, PATIENCE).unwrap();
                crash(&scope);
            }));
            assert!(outcome.is_err());
            assert!(nothing_locked(&test));
        }
    }

    #[test]
    fn test_with_resources_returns_body_value() {
        let test = seeded_lab(&["T1"]);
        let view = view(&test, "T1");

        let names = view
            .with_resources(&a(2), Some(Priority::URGENT), PATIENCE, |scope| {
                Ok(scope
                    .position_names()
                    .into_iter()
                    .map(str::to_string)
                    .collect::<Vec<_>>())
            })
            .unwrap();
        assert_eq!(names, vec!["A1", "A2"]);
        assert!(nothing_locked(&test));
    }

    #[test]
    fn test_device_wrap_failure_releases_grant() {
        let test = seeded_lab_with(FakeDeviceClient::failing_for("oven"), &["T1"]);
        let view = view(&test, "T1");

        let err = view.request_resources(&oven_tray(), None, PATIENCE).unwrap_err();
        assert!(matches!(err, LabError::Coordinator(_)));
        assert!(nothing_locked(&test));
    }

    #[test]
    fn test_waiting_task_gets_resources_after_scope_ends() {
        let test = seeded_lab(&["T1", "T2"]);
        let first = view(&test, "T1");
        let scope = first.request_resources(&a(3), None, PATIENCE).unwrap();

        let second = view(&test, "T2");
        let waiter = std::thread::spawn(move || {
            second
                .request_resources(&a(1), None, Some(Duration::from_secs(5)))
                .map(|scope| scope.position_names().len())
        });
        while test.lab.broker().pending_len() == 0 {
            std::thread::sleep(Duration::from_millis(2));
        }

        drop(scope);
        assert_eq!(waiter.join().unwrap().unwrap(), 1);
    }

    #[test]
    fn test_move_sample_rules() {
        let test = seeded_lab(&["T1", "T2"]);
        let view = view(&test, "T1");
        let engine = test.lab.engine();

        let sample = view.create_sample(NewSample::named("powder")).unwrap();
        assert_eq!(sample.task_id.as_ref(), Some(view.task_id()));
        let foreign = test
            .lab
            .ledger()
            .create_sample(NewSample::named("other").owned_by(TaskId::new("T2")))
            .unwrap();

        let err = view.move_sample(&foreign.id, None).unwrap_err();
        assert!(matches!(err, LabError::Ownership(_)));

        let err = view.move_sample(&sample.id, Some("A1")).unwrap_err();
        assert!(matches!(err, LabError::Ownership(_)));

        engine.lock_one(&TaskId::new("T2"), "A2").unwrap();
        let err = view.move_sample(&sample.id, Some("A2")).unwrap_err();
        assert!(matches!(err, LabError::Ownership(_)));

        engine.lock_one(view.task_id(), "A1").unwrap();
        let moved = view.move_sample(&sample.id, Some("A1")).unwrap();
        assert_eq!(moved.position.as_deref(), Some("A1"));
        assert_eq!(view.position_status("A1").unwrap().status, PositionStatus::Occupied);

        let again = view.move_sample(&sample.id, Some("A1")).unwrap();
        assert_eq!(again.last_updated, moved.last_updated);

        let second = view.create_sample(NewSample::named("second")).unwrap();
        let err = view.move_sample(&second.id, Some("A1")).unwrap_err();
        assert!(matches!(err, LabError::Ownership(_)));

        let out = view.move_sample(&sample.id, None).unwrap();
        assert_eq!(out.position, None);
    }

    #[test]
    fn test_sample_and_position_queries() {
        let test = seeded_lab(&["T1"]);
        let view = view(&test, "T1");
        let engine = test.lab.engine();

        engine.lock_one(view.task_id(), "A3").unwrap();
        let placed = view.create_sample(NewSample::named("placed").at("A3")).unwrap();
        view.create_sample(NewSample::named("loose")).unwrap();

        let located = view.located_samples_for_task().unwrap();
        assert_eq!(located.len(), 1);
        assert_eq!(located[0].id, placed.id);
        assert_eq!(view.get_sample(&placed.id).unwrap().name, "placed");
        assert!(matches!(
            view.get_sample(&SampleId::new("nope")),
            Err(LabError::NotFound(_))
        ));

        assert_eq!(view.locked_positions().unwrap(), vec!["A3"]);
        assert_eq!(view.parent_device("oven/tray").unwrap().as_deref(), Some("oven"));
        assert_eq!(view.position_status("A1").unwrap().status, PositionStatus::Empty);
    }
}
