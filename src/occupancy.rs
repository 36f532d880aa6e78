//! Derived occupancy of positions.
//!
//! Status is never stored. It is computed by joining a position with the
//! samples collection:
//! - OCCUPIED: a sample references the position (wins over the owner field)
//! - LOCKED: no sample, but a task owns the position
//! - EMPTY: neither

use crate::error::Result;
use crate::ledger::{Ledger, PositionRecord, TaskId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus {
    Empty,
    Locked,
    Occupied,
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionStatus::Empty => write!(f, "EMPTY"),
            PositionStatus::Locked => write!(f, "LOCKED"),
            PositionStatus::Occupied => write!(f, "OCCUPIED"),
        }
    }
}

/// Status of a position and the task it belongs to.
///
/// For OCCUPIED the task is the owner of the sample, for LOCKED the owner of
/// the position, for EMPTY none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupancy {
    pub status: PositionStatus,
    pub task: Option<TaskId>,
}

/// Resolve the status of one position.
///
/// # Errors
///
/// `LabError::NotFound` if the position does not exist.
pub fn status(ledger: &Ledger, position: &str) -> Result<Occupancy> {
    let record = ledger.require_position(position)?;
    let sample = ledger.sample_at(position)?;
    Ok(resolve(&record, sample.as_ref().map(|s| &s.task_id)))
}

pub fn is_unoccupied(ledger: &Ledger, position: &str) -> Result<bool> {
    Ok(status(ledger, position)?.status != PositionStatus::Occupied)
}

/// Resolve against a prefetched [`Ledger::occupied_positions`] map.
pub(crate) fn status_in(
    record: &PositionRecord,
    occupied: &HashMap<String, Option<TaskId>>,
) -> Occupancy {
    resolve(record, occupied.get(&record.name))
}

fn resolve(record: &PositionRecord, sample_owner: Option<&Option<TaskId>>) -> Occupancy {
    match sample_owner {
        Some(owner) => Occupancy {
            status: PositionStatus::Occupied,
            task: owner.clone(),
        },
        None => match &record.task_id {
            Some(task) => Occupancy {
                status: PositionStatus::Locked,
                task: Some(task.clone()),
            },
            None => Occupancy {
                status: PositionStatus::Empty,
                task: None,
            },
        },
    }
}
