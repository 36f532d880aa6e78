//! Interfaces to the systems a task runs alongside.
//!
//! The task coordinator tracks the lifecycle of each task; the device client
//! turns a granted device name into something the task can drive. Both live
//! outside this crate; [`InMemoryCoordinator`] is a process-local stand-in.

use crate::error::{LabError, Result};
use crate::ledger::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Lifecycle state of a task as seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Waiting,
    Ready,
    RequestingResources,
    Running,
    Paused,
    Completed,
    Error,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Waiting => "WAITING",
            TaskStatus::Ready => "READY",
            TaskStatus::RequestingResources => "REQUESTING_RESOURCES",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Paused => "PAUSED",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Error => "ERROR",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    /// Whether the task has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Error | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the coordinator knows about one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub last_updated: DateTime<Utc>,
}

/// Tracks task lifecycle state.
pub trait TaskStatusCoordinator: Send + Sync {
    fn update_status(&self, task: &TaskId, status: TaskStatus) -> Result<()>;

    /// # Errors
    ///
    /// `LabError::NotFound` if the task is unknown.
    fn get_task(&self, task: &TaskId) -> Result<TaskEntry>;
}

/// Produces handles for granted devices.
pub trait DeviceClient: Send + Sync {
    type Handle: Send;

    fn wrapper_for(&self, device: &str) -> Result<Self::Handle>;
}

/// Coordinator that keeps task state in memory.
///
/// Every status change is kept, so the full lifecycle of a task can be read
/// back with [`InMemoryCoordinator::history`].
#[derive(Debug, Default)]
pub struct InMemoryCoordinator {
    tasks: Mutex<HashMap<TaskId, Vec<TaskEntry>>>,
}

impl InMemoryCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `task` known with status `WAITING`. Re-registering is a no-op.
    pub fn register(&self, task: &TaskId) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.entry(task.clone()).or_insert_with(|| {
            vec![TaskEntry {
                task_id: task.clone(),
                status: TaskStatus::Waiting,
                last_updated: Utc::now(),
            }]
        });
    }

    /// Statuses `task` went through, oldest first.
    pub fn history(&self, task: &TaskId) -> Vec<TaskStatus> {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks
            .get(task)
            .map(|entries| entries.iter().map(|e| e.status).collect())
            .unwrap_or_default()
    }
}

impl TaskStatusCoordinator for InMemoryCoordinator {
    fn update_status(&self, task: &TaskId, status: TaskStatus) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = tasks
            .get_mut(task)
            .ok_or_else(|| unknown_task(task))?;
        entries.push(TaskEntry {
            task_id: task.clone(),
            status,
            last_updated: Utc::now(),
        });
        Ok(())
    }

    fn get_task(&self, task: &TaskId) -> Result<TaskEntry> {
        let tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks
            .get(task)
            .and_then(|entries| entries.last().cloned())
            .ok_or_else(|| unknown_task(task))
    }
}

fn unknown_task(task: &TaskId) -> LabError {
    LabError::NotFound(format!("task {} is not known to the coordinator", task))
}
