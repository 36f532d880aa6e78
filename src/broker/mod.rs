//! Priority wait broker.
//!
//! Turns the reservation engine's one-shot decision into a blocking request
//! with a deadline. A request that cannot be granted right now is queued and
//! retried by a sweeper thread, whenever a release is notified and at every
//! sweep interval, until it is granted or its deadline passes.
//!
//! # Request Lifecycle
//!
//! ```text
//! PENDING --(reserve granted)------> GRANTED
//!         --(deadline passed)------> TIMED_OUT
//!         --(non-contention error)-> FAILED
//!         --(broker shut down)-----> FAILED
//! ```
//!
//! Pending requests are attempted in order of priority (highest first), then
//! arrival. Once a request stays unsatisfiable, every later request that may
//! overlap it is held back until it is served, so a stream of small requests
//! cannot starve a large one. Later requests for disjoint resources are still
//! served.
//!
//! The decision lock is never held while waiting: every retry re-runs the
//! whole reservation.

mod queue;


use crate::error::{LabError, Result};
use crate::ledger::TaskId;
use crate::request::{Priority, ResourceRequest};
use crate::reservation::{Grant, ReservationEngine, ReserveOutcome};
use queue::{PendingQueue, QueueKey, Slot, SlotState};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct BrokerState {
    queue: PendingQueue,
    /// A release happened or a request was queued since the last sweep.
    dirty: bool,
    shutdown: bool,
    next_seq: u64,
}

#[derive(Debug)]
struct Shared {
    engine: ReservationEngine,
    state: Mutex<BrokerState>,
    wake: Condvar,
    sweep_interval: Duration,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_dirty(&self) {
        let mut state = self.lock();
        state.dirty = true;
        self.wake.notify_all();
    }

    fn remove(&self, key: &QueueKey) {
        self.lock().queue.remove(key);
    }
}

/// Queues resource requests and grants them as resources free up.
#[derive(Debug)]
pub struct WaitBroker {
    shared: Arc<Shared>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl WaitBroker {
    /// Start a broker and its sweeper thread.
    pub fn new(engine: ReservationEngine, sweep_interval: Duration) -> Result<Self> {
        let shared = Arc::new(Shared {
            engine,
            state: Mutex::new(BrokerState::default()),
            wake: Condvar::new(),
            sweep_interval,
        });

        let sweeper_shared = Arc::clone(&shared);
        let handle = std::thread::Builder::new()
            .name("labslot-sweeper".to_string())
            .spawn(move || run_sweeper(&sweeper_shared))
            .map_err(|e| {
                LabError::Coordinator(format!("failed to start broker sweeper thread: {}", e))
            })?;

        Ok(Self {
            shared,
            sweeper: Mutex::new(Some(handle)),
        })
    }

    pub fn engine(&self) -> &ReservationEngine {
        &self.shared.engine
    }

    /// Reserve `request` for `task`, waiting up to `timeout` for contention
    /// to clear. `None` waits indefinitely.
    ///
    /// # Errors
    ///
    /// * `LabError::Validation`, `LabError::Capacity`, `LabError::NotFound` -
    ///   returned at once; such requests are never queued
    /// * `LabError::Timeout` - not granted before the deadline
    /// * any non-contention error raised while retrying
    pub fn submit(
        &self,
        task: &TaskId,
        request: &ResourceRequest,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<Grant> {
        // A timeout too large to represent is the same as none.
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        self.shared.engine.check_request(request)?;

        let jump_queue = {
            let state = self.shared.lock();
            if state.shutdown {
                return Err(shut_down());
            }
            !state.queue.has_waiting_at_or_above(priority)
        };

        if jump_queue {
            match self.shared.engine.reserve(task, request) {
                Ok(ReserveOutcome::Granted(grant)) => return Ok(grant),
                Ok(ReserveOutcome::Unsatisfiable { reason }) => {
                    tracing::debug!(task = %task, %priority, %reason, "queueing request");
                }
                Err(e) if e.is_retryable() => {
                    tracing::debug!(task = %task, %priority, error = %e, "queueing request after retryable error");
                }
                Err(e) => return Err(e),
            }
        }

        let slot = self.enqueue(task, request, priority, deadline)?;
        self.wait(&slot, timeout)
    }

    /// One immediate attempt; contention is reported as `LabError::Contention`.
    pub fn try_submit(&self, task: &TaskId, request: &ResourceRequest) -> Result<Grant> {
        match self.shared.engine.reserve(task, request)? {
            ReserveOutcome::Granted(grant) => Ok(grant),
            ReserveOutcome::Unsatisfiable { reason } => Err(LabError::Contention(reason)),
        }
    }

    /// Wake the sweeper after resources were released.
    pub fn notify_released(&self) {
        self.shared.mark_dirty();
    }

    pub fn pending_len(&self) -> usize {
        self.shared.lock().queue.len()
    }

    /// Stop the sweeper and fail every pending request. Idempotent.
    pub fn shutdown(&self) {
        let drained = {
            let mut state = self.shared.lock();
            state.shutdown = true;
            self.shared.wake.notify_all();
            state.queue.drain()
        };
        for slot in drained {
            let mut guard = slot.lock();
            slot.finish(&mut guard, SlotState::Failed(shut_down()));
        }

        let handle = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            tracing::warn!("broker sweeper thread panicked");
        }
    }

    fn enqueue(
        &self,
        task: &TaskId,
        request: &ResourceRequest,
        priority: Priority,
        deadline: Option<Instant>,
    ) -> Result<Arc<Slot>> {
        let mut state = self.shared.lock();
        if state.shutdown {
            return Err(shut_down());
        }
        let seq = state.next_seq;
        state.next_seq += 1;

        let slot = Arc::new(Slot::new(
            priority,
            seq,
            task.clone(),
            request.clone(),
            deadline,
        ));
        state.queue.push(Arc::clone(&slot));
        state.dirty = true;
        self.shared.wake.notify_all();
        Ok(slot)
    }

    /// Block until `slot` leaves `Pending`.
    fn wait(&self, slot: &Arc<Slot>, timeout: Option<Duration>) -> Result<Grant> {
        let mut state = slot.lock();
        loop {
            match &*state {
                SlotState::Granted(grant) => return Ok(grant.clone()),
                SlotState::Failed(e) => return Err(e.clone()),
                SlotState::TimedOut => return Err(timed_out(&slot.task, timeout)),
                SlotState::Pending => {}
            }

            state = match slot.deadline {
                None => slot
                    .changed()
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        slot.finish(&mut state, SlotState::TimedOut);
                        drop(state);
                        self.shared.remove(&slot.key);
                        tracing::debug!(task = %slot.task, "request timed out");
                        return Err(timed_out(&slot.task, timeout));
                    }
                    slot.changed()
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

impl Drop for WaitBroker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn shut_down() -> LabError {
    LabError::Coordinator("the wait broker has been shut down".to_string())
}

fn timed_out(task: &TaskId, timeout: Option<Duration>) -> LabError {
    LabError::Timeout(format!(
        "request of task {} was not granted within {:?}",
        task,
        timeout.unwrap_or_default()
    ))
}

fn run_sweeper(shared: &Shared) {
    loop {
        let pending = {
            let mut state = shared.lock();
            while !state.shutdown && !state.dirty {
                if state.queue.is_empty() {
                    state = shared.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
                } else {
                    let (next, result) = shared
                        .wake
                        .wait_timeout(state, shared.sweep_interval)
                        .unwrap_or_else(PoisonError::into_inner);
                    state = next;
                    if result.timed_out() {
                        break;
                    }
                }
            }
            if state.shutdown {
                return;
            }
            state.dirty = false;
            state.queue.snapshot()
        };

        let mut finished: Vec<QueueKey> = Vec::new();
        let mut blocked: Vec<&Slot> = Vec::new();
        for slot in &pending {
            if blocked.iter().any(|waiting| waiting.may_overlap(slot)) {
                continue;
            }
            if attempt(shared, slot) {
                finished.push(slot.key);
            } else {
                blocked.push(slot);
            }
        }

        if !finished.is_empty() {
            let mut state = shared.lock();
            for key in &finished {
                state.queue.remove(key);
            }
        }
    }
}

/// Retry one pending slot. Returns true once the slot has left `Pending`.
fn attempt(shared: &Shared, slot: &Slot) -> bool {
    let mut state = slot.lock();
    if !matches!(*state, SlotState::Pending) {
        return true;
    }
    if slot.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
        return slot.finish(&mut state, SlotState::TimedOut);
    }

    match shared.engine.reserve(&slot.task, &slot.request) {
        Ok(ReserveOutcome::Granted(grant)) => {
            tracing::info!(
                task = %slot.task,
                priority = %slot.priority(),
                request_id = %grant.request_id,
                "queued request granted"
            );
            slot.finish(&mut state, SlotState::Granted(grant))
        }
        Ok(ReserveOutcome::Unsatisfiable { .. }) => false,
        Err(e) if e.is_retryable() => {
            tracing::debug!(task = %slot.task, error = %e, "retryable error, request stays queued");
            false
        }
        Err(e) => {
            tracing::warn!(task = %slot.task, error = %e, "queued request failed");
            slot.finish(&mut state, SlotState::Failed(e))
        }
    }
}
