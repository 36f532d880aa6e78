//! Prefix matching over position names.

use crate::error::{LabError, Result};
use crate::ledger::{Ledger, NamePrefix, PositionRecord, TaskId};
use crate::occupancy::{self, PositionStatus};
use crate::reservation::GrantedPosition;
use std::collections::HashMap;

/// Number of positions whose name starts with `prefix`, whatever their state.
pub fn match_count(ledger: &Ledger, prefix: &NamePrefix) -> Result<usize> {
    Ok(ledger.positions_with_prefix(prefix)?.len())
}

/// Positions under `prefix` that `task` may take right now.
///
/// A position qualifies when its owner is unset or `task`, and it is EMPTY or
/// its status belongs to `task`. `need_release` is false only for positions
/// `task` already owns.
///
/// # Errors
///
/// `LabError::NotFound` if no position at all matches `prefix`.
pub fn candidates(
    ledger: &Ledger,
    task: &TaskId,
    prefix: &NamePrefix,
) -> Result<Vec<GrantedPosition>> {
    let records = ledger.positions_with_prefix(prefix)?;
    if records.is_empty() {
        return Err(no_match(prefix));
    }
    let occupied = ledger.occupied_positions()?;
    Ok(candidates_in(&records, &occupied, task))
}

pub(crate) fn no_match(prefix: &NamePrefix) -> LabError {
    LabError::NotFound(format!("no position name starts with '{}'", prefix))
}

/// [`candidates`] over prefetched records and occupancy.
pub(crate) fn candidates_in(
    records: &[PositionRecord],
    occupied: &HashMap<String, Option<TaskId>>,
    task: &TaskId,
) -> Vec<GrantedPosition> {
    records
        .iter()
        .filter(|record| record.task_id.is_none() || record.task_id.as_ref() == Some(task))
        .filter(|record| {
            let occupancy = occupancy::status_in(record, occupied);
            occupancy.status == PositionStatus::Empty || occupancy.task.as_ref() == Some(task)
        })
        .map(|record| GrantedPosition {
            name: record.name.clone(),
            need_release: record.task_id.as_ref() != Some(task),
        })
        .collect()
}
