//! Audit event log of ledger mutations.
//!
//! Every mutation of the ledger (registration, reservation, release, sample
//! moves, reclamation) is recorded as one event. With the file backend the
//! events are appended as NDJSON (one JSON object per line) to
//! `{ledger_dir}/events/events.ndjson`, so every process sharing the ledger
//! writes to the same log.
//!
//! # Event Format
//!
//! Each event is a JSON object with the following fields:
//! - `ts`: RFC3339 timestamp
//! - `action`: The action performed (reserve, release, move_sample, etc.)
//! - `actor`: The process owner string (e.g., `user@HOST`)
//! - `task`: Optional task ID the mutation was made for
//! - `details`: Freeform object with action-specific details
//!
//! # Usage
//!
//! ```no_run
//! use labslot::events::{Event, EventAction, EventLog};
//! use serde_json::json;
//!
//! let log = EventLog::file("/srv/ledger/events/events.ndjson");
//! let event = Event::new(EventAction::LockPosition)
//!     .with_task("T1")
//!     .with_details(json!({"position": "oven/tray/1"}));
//! log.append(&event)?;
//! # Ok::<(), labslot::error::LabError>(())
//! ```

use crate::error::{LabError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Actions that can be logged as events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// Device registered
    RegisterDevice,
    /// Positions added
    RegisterPositions,
    /// Resource bundle granted
    Reserve,
    /// Resource bundle released
    Release,
    /// Single position locked
    LockPosition,
    /// Single position released
    ReleasePosition,
    /// Sample created
    CreateSample,
    /// Sample moved
    MoveSample,
    /// Sample owner changed
    TransferSample,
    /// Locks of a task reclaimed by an operator
    Reclaim,
    /// Positions collection dropped
    ResetPositions,
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventAction::RegisterDevice => write!(f, "register_device"),
            EventAction::RegisterPositions => write!(f, "register_positions"),
            EventAction::Reserve => write!(f, "reserve"),
            EventAction::Release => write!(f, "release"),
            EventAction::LockPosition => write!(f, "lock_position"),
            EventAction::ReleasePosition => write!(f, "release_position"),
            EventAction::CreateSample => write!(f, "create_sample"),
            EventAction::MoveSample => write!(f, "move_sample"),
            EventAction::TransferSample => write!(f, "transfer_sample"),
            EventAction::Reclaim => write!(f, "reclaim"),
            EventAction::ResetPositions => write!(f, "reset_positions"),
        }
    }
}

/// An event record for the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// RFC3339 timestamp when the event occurred.
    pub ts: DateTime<Utc>,

    /// The action that was performed.
    pub action: EventAction,

    /// The process owner that performed the action (e.g., `user@HOST`).
    pub actor: String,

    /// Task the mutation was made for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,

    /// Freeform details object with action-specific information.
    pub details: Value,
}

impl Event {
    /// Create a new event with the given action.
    ///
    /// The timestamp is set to the current time, and the actor is
    /// determined from the environment (USER@HOSTNAME).
    pub fn new(action: EventAction) -> Self {
        Self {
            ts: Utc::now(),
            action,
            actor: get_actor_string(),
            task: None,
            details: Value::Object(serde_json::Map::new()),
        }
    }

    /// Set the task ID for this event.
    pub fn with_task(mut self, task_id: impl ToString) -> Self {
        self.task = Some(task_id.to_string());
        self
    }

    /// Set the details object for this event.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Serialize the event to a single-line JSON string.
    pub fn to_ndjson_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| LabError::Store(format!("failed to serialize event to JSON: {}", e)))
    }
}

fn get_actor_string() -> String {
    crate::locks::get_owner_string()
}

/// Destination of audit events.
#[derive(Debug)]
pub enum EventLog {
    /// Events are dropped.
    Disabled,
    /// Events are appended to an NDJSON file.
    File(PathBuf),
    /// Events are kept in memory (memory backend, tests).
    Memory(Mutex<Vec<Event>>),
}

impl EventLog {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        EventLog::File(path.into())
    }

    pub fn memory() -> Self {
        EventLog::Memory(Mutex::new(Vec::new()))
    }

    /// Record one event.
    pub fn append(&self, event: &Event) -> Result<()> {
        match self {
            EventLog::Disabled => Ok(()),
            EventLog::File(path) => append_event(path, event),
            EventLog::Memory(events) => {
                events
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(event.clone());
                Ok(())
            }
        }
    }

    /// Every recorded event, oldest first.
    pub fn events(&self) -> Result<Vec<Event>> {
        match self {
            EventLog::Disabled => Ok(Vec::new()),
            EventLog::File(path) => read_events(path),
            EventLog::Memory(events) => Ok(events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()),
        }
    }
}

/// Append an event to an NDJSON events file.
///
/// The file and its directory are created if they don't exist. Each append
/// writes exactly one line with a trailing newline and syncs it to disk.
pub fn append_event(events_file: &Path, event: &Event) -> Result<()> {
    let json_line = event.to_ndjson_line()?;

    if let Some(events_dir) = events_file.parent()
        && !events_dir.exists()
    {
        fs::create_dir_all(events_dir).map_err(|e| {
            LabError::Store(format!(
                "failed to create events directory '{}': {}",
                events_dir.display(),
                e
            ))
        })?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(events_file)
        .map_err(|e| {
            LabError::Store(format!(
                "failed to open events file '{}': {}",
                events_file.display(),
                e
            ))
        })?;

    writeln!(file, "{}", json_line).map_err(|e| {
        LabError::Store(format!(
            "failed to write event to '{}': {}",
            events_file.display(),
            e
        ))
    })?;

    file.sync_all().map_err(|e| {
        LabError::Store(format!(
            "failed to sync events file '{}': {}",
            events_file.display(),
            e
        ))
    })?;

    Ok(())
}

/// Read every event of an NDJSON events file. A missing file has no events.
pub fn read_events(events_file: &Path) -> Result<Vec<Event>> {
    let content = match fs::read_to_string(events_file) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(LabError::Store(format!(
                "failed to read events file '{}': {}",
                events_file.display(),
                e
            )));
        }
    };

    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .enumerate()
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| {
                LabError::Store(format!(
                    "failed to parse event {} of '{}': {}",
                    i + 1,
                    events_file.display(),
                    e
                ))
            })
        })
        .collect()
}
