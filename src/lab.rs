//! Wiring of one lab deployment.
//!
//! [`Lab::open`] builds the store, ledger, reservation engine, wait broker and
//! transport from a [`Config`]. Task code reaches all of it through
//! [`crate::lab_view::LabView`].

use crate::broker::WaitBroker;
use crate::collaborators::{DeviceClient, TaskStatusCoordinator};
use crate::config::{Config, StoreBackend};
use crate::context::LedgerContext;
use crate::error::Result;
use crate::events::EventLog;
use crate::ledger::{DeviceDefinition, Ledger, PositionTemplate, TaskId};
use crate::reservation::{ReservationEngine, StaleLock};
use crate::store::{DocumentStore, FileStore, MemoryStore};
use crate::transport::{LocalTransport, ResourceTransport};
use std::sync::Arc;

/// Shared services of a lab, built once per process.
pub struct Lab<D: DeviceClient> {
    config: Config,
    ledger: Arc<Ledger>,
    broker: Arc<WaitBroker>,
    transport: Arc<dyn ResourceTransport>,
    devices: Arc<D>,
    coordinator: Arc<dyn TaskStatusCoordinator>,
}

impl<D: DeviceClient> Lab<D> {
    /// Open the ledger named by `config` and start the wait broker.
    pub fn open(
        config: Config,
        devices: Arc<D>,
        coordinator: Arc<dyn TaskStatusCoordinator>,
    ) -> Result<Self> {
        config.validate()?;

        let (store, events): (Arc<dyn DocumentStore>, EventLog) = match config.backend {
            StoreBackend::File => {
                let ctx = LedgerContext::resolve_from(&config.ledger_dir);
                let events = if config.event_log {
                    EventLog::file(ctx.events_file())
                } else {
                    EventLog::Disabled
                };
                (Arc::new(FileStore::open(ctx, config.lock_options())?), events)
            }
            StoreBackend::Memory => {
                let events = if config.event_log {
                    EventLog::memory()
                } else {
                    EventLog::Disabled
                };
                let wait = config.lock_options().wait;
                (Arc::new(MemoryStore::new(wait)), events)
            }
        };

        let ledger = Arc::new(Ledger::new(store, events));
        let engine = ReservationEngine::new(Arc::clone(&ledger));
        let broker = Arc::new(WaitBroker::new(engine, config.sweep_interval())?);
        let transport: Arc<dyn ResourceTransport> =
            Arc::new(LocalTransport::new(Arc::clone(&broker)));

        tracing::debug!(backend = ?config.backend, "lab opened");
        Ok(Self {
            config,
            ledger,
            broker,
            transport,
            devices,
            coordinator,
        })
    }

    /// Route resource requests through `transport` instead of the local broker.
    pub fn with_transport(mut self, transport: Arc<dyn ResourceTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn engine(&self) -> &ReservationEngine {
        self.broker.engine()
    }

    pub fn broker(&self) -> &Arc<WaitBroker> {
        &self.broker
    }

    pub fn transport(&self) -> &Arc<dyn ResourceTransport> {
        &self.transport
    }

    pub fn devices(&self) -> &Arc<D> {
        &self.devices
    }

    pub fn coordinator(&self) -> &Arc<dyn TaskStatusCoordinator> {
        &self.coordinator
    }

    pub fn register_device(&self, definition: &DeviceDefinition) -> Result<bool> {
        self.ledger.register_device(definition)
    }

    pub fn add_positions(
        &self,
        templates: &[PositionTemplate],
        parent_device: Option<&str>,
    ) -> Result<Vec<String>> {
        self.ledger.add_positions(templates, parent_device)
    }

    /// Locks held longer than the configured `position_stale_minutes`.
    pub fn stale_locks(&self) -> Result<Vec<StaleLock>> {
        self.engine().stale_locks(self.config.position_stale_after())
    }

    /// Clear every lock of `task` and wake waiting requests.
    pub fn reclaim_task(&self, task: &TaskId) -> Result<Vec<String>> {
        let cleared = self.engine().reclaim_task(task)?;
        if !cleared.is_empty() {
            self.broker.notify_released();
        }
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::InMemoryCoordinator;
    use crate::events::EventAction;
    use crate::request::{Priority, PositionRequest, ResourceRequest};
    use crate::test_support::{FakeDeviceClient, memory_config, seeded_lab};
    use tempfile::TempDir;

    #[test]
    fn test_open_file_backend_creates_layout() {
        let dir = TempDir::new().unwrap();
        let config = Config {
            ledger_dir: dir.path().join("ledger").to_string_lossy().into_owned(),
            ..Config::default()
        };
        let lab = Lab::open(
            config,
            Arc::new(FakeDeviceClient::default()),
            Arc::new(InMemoryCoordinator::new()),
        )
        .unwrap();

        lab.add_positions(&[PositionTemplate::new("A1", 1)], None).unwrap();
        assert!(dir.path().join("ledger/positions").is_dir());
        assert!(dir.path().join("ledger/events/events.ndjson").is_file());
        assert_eq!(
            lab.ledger().events().events().unwrap()[0].action,
            EventAction::RegisterPositions
        );
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let config = Config {
            lock_wait_ms: 1,
            lock_retry_ms: 10,
            ..memory_config()
        };
        assert!(
            Lab::open(
                config,
                Arc::new(FakeDeviceClient::default()),
                Arc::new(InMemoryCoordinator::new()),
            )
            .is_err()
        );
    }

    #[test]
    fn test_reclaim_wakes_waiters() {
        let test = seeded_lab(&[]);
        let lab = &test.lab;
        let request = ResourceRequest::new().positions([PositionRequest::new("A", 3)]);
        lab.transport()
            .request_resources(&TaskId::new("crashed"), &request, Priority::NORMAL, None)
            .unwrap();

        let waiting = {
            let lab = Arc::clone(lab);
            let request = request.clone();
            std::thread::spawn(move || {
                lab.transport().request_resources(
                    &TaskId::new("T2"),
                    &request,
                    Priority::NORMAL,
                    Some(std::time::Duration::from_secs(5)),
                )
            })
        };
        while lab.broker().pending_len() == 0 {
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        assert_eq!(lab.reclaim_task(&TaskId::new("crashed")).unwrap().len(), 3);
        assert!(waiting.join().unwrap().is_ok());
        assert!(lab.stale_locks().unwrap().is_empty());
    }
}
