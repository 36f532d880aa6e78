//! Pending request slots and their ordering.

use crate::error::LabError;
use crate::ledger::{SEPARATOR, TaskId};
use crate::request::{DeviceSelector, Priority, ResourceRequest};
use crate::reservation::Grant;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Highest priority first, then arrival order.
pub(super) type QueueKey = (Reverse<Priority>, u64);

#[derive(Debug)]
pub(super) enum SlotState {
    Pending,
    Granted(Grant),
    TimedOut,
    Failed(LabError),
}

/// One queued request and the thread waiting on it.
#[derive(Debug)]
pub(super) struct Slot {
    pub key: QueueKey,
    pub task: TaskId,
    pub request: ResourceRequest,
    pub deadline: Option<Instant>,
    state: Mutex<SlotState>,
    changed: Condvar,
}

impl Slot {
    pub fn new(
        priority: Priority,
        seq: u64,
        task: TaskId,
        request: ResourceRequest,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            key: (Reverse(priority), seq),
            task,
            request,
            deadline,
            state: Mutex::new(SlotState::Pending),
            changed: Condvar::new(),
        }
    }

    pub fn priority(&self) -> Priority {
        self.key.0.0
    }

    pub fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move out of `Pending`; a slot that already left it is not touched.
    ///
    /// Returns whether the transition happened.
    pub fn finish(&self, guard: &mut MutexGuard<'_, SlotState>, state: SlotState) -> bool {
        if !matches!(**guard, SlotState::Pending) {
            return false;
        }
        **guard = state;
        self.changed.notify_all();
        true
    }

    pub fn changed(&self) -> &Condvar {
        &self.changed
    }

    /// Whether granting `other` could take resources this slot waits for.
    ///
    /// Conservative: a device type may resolve to any device, so it
    /// overlaps everything.
    pub fn may_overlap(&self, other: &Slot) -> bool {
        let (Some(mine), Some(theirs)) = (footprint(&self.request), footprint(&other.request))
        else {
            return true;
        };
        mine.iter().any(|a| {
            theirs
                .iter()
                .any(|b| a.starts_with(b.as_str()) || b.starts_with(a.as_str()))
        })
    }
}

/// Name prefixes a request can touch; `None` when it names a device type.
fn footprint(request: &ResourceRequest) -> Option<Vec<String>> {
    let mut prefixes = Vec::new();
    for (selector, items) in request.entries() {
        match selector {
            DeviceSelector::ByType(_) => return None,
            DeviceSelector::ByName(name) => {
                prefixes.push(format!("{}{}", name, SEPARATOR));
                prefixes.extend(
                    items
                        .iter()
                        .map(|item| format!("{}{}{}", name, SEPARATOR, item.prefix)),
                );
            }
            DeviceSelector::Unowned => {
                prefixes.extend(items.iter().map(|item| item.prefix.clone()));
            }
        }
    }
    Some(prefixes)
}

/// Pending slots in service order.
#[derive(Debug, Default)]
pub(super) struct PendingQueue {
    entries: BTreeMap<QueueKey, Arc<Slot>>,
}

impl PendingQueue {
    pub fn push(&mut self, slot: Arc<Slot>) {
        self.entries.insert(slot.key, slot);
    }

    pub fn remove(&mut self, key: &QueueKey) -> Option<Arc<Slot>> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a request of at least `priority` is already waiting.
    pub fn has_waiting_at_or_above(&self, priority: Priority) -> bool {
        self.entries
            .keys()
            .next()
            .is_some_and(|(Reverse(first), _)| *first >= priority)
    }

    /// Slots in service order.
    pub fn snapshot(&self) -> Vec<Arc<Slot>> {
        self.entries.values().cloned().collect()
    }

    pub fn drain(&mut self) -> Vec<Arc<Slot>> {
        std::mem::take(&mut self.entries).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(priority: u32, seq: u64) -> Arc<Slot> {
        Arc::new(Slot::new(
            Priority(priority),
            seq,
            TaskId::new(format!("T{}", seq)),
            ResourceRequest::new(),
            None,
        ))
    }

    #[test]
    fn test_service_order_is_priority_then_arrival() {
        let mut queue = PendingQueue::default();
        queue.push(slot(20, 0));
        queue.push(slot(100, 1));
        queue.push(slot(20, 2));
        queue.push(slot(40, 3));

        let order: Vec<u64> = queue.snapshot().iter().map(|s| s.key.1).collect();
        assert_eq!(order, vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_waiting_at_or_above() {
        let mut queue = PendingQueue::default();
        assert!(!queue.has_waiting_at_or_above(Priority(0)));

        queue.push(slot(20, 0));
        assert!(queue.has_waiting_at_or_above(Priority(20)));
        assert!(queue.has_waiting_at_or_above(Priority(5)));
        assert!(!queue.has_waiting_at_or_above(Priority::URGENT));
    }

    #[test]
    fn test_finish_only_leaves_pending_once() {
        let slot = slot(20, 0);
        let mut state = slot.lock();
        assert!(slot.finish(&mut state, SlotState::TimedOut));
        assert!(!slot.finish(&mut state, SlotState::Failed(LabError::Timeout("late".into()))));
        assert!(matches!(*state, SlotState::TimedOut));
    }

    fn slot_for(request: ResourceRequest) -> Slot {
        Slot::new(Priority::NORMAL, 0, TaskId::new("T"), request, None)
    }

    #[test]
    fn test_overlap_of_requests() {
        let a = slot_for(ResourceRequest::new().positions(["A"]));
        let a2 = slot_for(ResourceRequest::new().positions(["A2"]));
        let b = slot_for(ResourceRequest::new().positions(["B"]));
        let oven = slot_for(ResourceRequest::new().device("oven", ["tray"]));
        let oven_lid = slot_for(ResourceRequest::new().device("oven", ["lid"]));
        let tray_by_name = slot_for(ResourceRequest::new().positions(["oven/tray/1"]));
        let furnace = slot_for(ResourceRequest::new().device_type("furnace", ["tray"]));

        assert!(a.may_overlap(&a2));
        assert!(a2.may_overlap(&a));
        assert!(!a.may_overlap(&b));
        assert!(!a.may_overlap(&oven));
        assert!(oven.may_overlap(&oven_lid));
        assert!(oven.may_overlap(&tray_by_name));
        assert!(furnace.may_overlap(&b));
        assert!(b.may_overlap(&furnace));
    }

    #[test]
    fn test_drain_and_remove() {
        let mut queue = PendingQueue::default();
        let first = slot(20, 0);
        queue.push(first.clone());
        queue.push(slot(20, 1));

        assert!(queue.remove(&first.key).is_some());
        assert!(queue.remove(&first.key).is_none());
        assert_eq!(queue.drain().len(), 1);
        assert!(queue.is_empty());
    }
}
