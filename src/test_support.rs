use crate::collaborators::{DeviceClient, InMemoryCoordinator};
use crate::config::{Config, StoreBackend};
use crate::error::{LabError, Result};
use crate::events::EventLog;
use crate::lab::Lab;
use crate::ledger::{DeviceDefinition, Ledger, PositionTemplate, TaskId};
use crate::store::MemoryStore;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Ledger over a fresh memory store with one unowned position per name.
pub(crate) fn ledger_with_positions(names: &[&str]) -> Ledger {
    let ledger = Ledger::new(
        Arc::new(MemoryStore::new(Duration::from_secs(2))),
        EventLog::memory(),
    );
    let templates: Vec<PositionTemplate> =
        names.iter().map(|name| PositionTemplate::new(*name, 1)).collect();
    ledger.add_positions(&templates, None).unwrap();
    ledger
}

/// Oven device `oven` of type `furnace` with `oven/tray/1..4`, plus free
/// positions `A1..A3`.
pub(crate) fn seed(ledger: &Ledger) {
    ledger
        .register_device(
            &DeviceDefinition::new("oven", "furnace")
                .with_positions([PositionTemplate::new("tray", 4)]),
        )
        .unwrap();
    ledger
        .add_positions(
            &[
                PositionTemplate::new("A1", 1),
                PositionTemplate::new("A2", 1),
                PositionTemplate::new("A3", 1),
            ],
            None,
        )
        .unwrap();
}

pub(crate) fn seeded_ledger() -> Arc<Ledger> {
    let ledger = ledger_with_positions(&[]);
    seed(&ledger);
    Arc::new(ledger)
}

/// Memory-backed config with a short sweep interval.
pub(crate) fn memory_config() -> Config {
    Config {
        backend: StoreBackend::Memory,
        lock_wait_ms: 2_000,
        sweep_interval_ms: 20,
        ..Config::default()
    }
}

/// Device client whose handles are the device names.
#[derive(Debug, Default)]
pub(crate) struct FakeDeviceClient {
    pub fail_for: Option<String>,
    pub wrapped: Mutex<Vec<String>>,
}

impl FakeDeviceClient {
    pub(crate) fn failing_for(device: &str) -> Self {
        Self {
            fail_for: Some(device.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn wrapped(&self) -> Vec<String> {
        self.wrapped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl DeviceClient for FakeDeviceClient {
    type Handle = String;

    fn wrapper_for(&self, device: &str) -> Result<String> {
        if self.fail_for.as_deref() == Some(device) {
            return Err(LabError::Coordinator(format!(
                "device '{}' is offline",
                device
            )));
        }
        self.wrapped
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(device.to_string());
        Ok(device.to_string())
    }
}

pub(crate) struct TestLab {
    pub lab: Arc<Lab<FakeDeviceClient>>,
    pub coordinator: Arc<InMemoryCoordinator>,
}

/// Seeded memory lab; `tasks` are registered with the coordinator.
pub(crate) fn seeded_lab_with(devices: FakeDeviceClient, tasks: &[&str]) -> TestLab {
    let coordinator = Arc::new(InMemoryCoordinator::new());
    for task in tasks {
        coordinator.register(&TaskId::new(*task));
    }
    let lab = Lab::open(memory_config(), Arc::new(devices), coordinator.clone()).unwrap();
    seed(lab.ledger());
    TestLab {
        lab: Arc::new(lab),
        coordinator,
    }
}

pub(crate) fn seeded_lab(tasks: &[&str]) -> TestLab {
    seeded_lab_with(FakeDeviceClient::default(), tasks)
}
