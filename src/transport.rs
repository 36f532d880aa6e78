//! Request/release transport between a task and the broker.
//!
//! Tasks never talk to the broker directly; they go through a
//! [`ResourceTransport`], so the broker can live in another process.
//! [`LocalTransport`] is the in-process implementation.

use crate::broker::WaitBroker;
use crate::error::Result;
use crate::ledger::TaskId;
use crate::request::{Priority, ResourceRequest};
use crate::reservation::{Grant, RequestId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub trait ResourceTransport: Send + Sync {
    /// Block until `request` is granted for `task` or fails.
    fn request_resources(
        &self,
        task: &TaskId,
        request: &ResourceRequest,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<Grant>;

    /// Release a grant. Unknown ids are ignored, so releasing twice is fine.
    fn release_resources(&self, request_id: &RequestId) -> Result<()>;
}

/// Transport that calls a broker in the same process.
#[derive(Debug)]
pub struct LocalTransport {
    broker: Arc<WaitBroker>,
    outstanding: Mutex<HashMap<RequestId, Grant>>,
}

impl LocalTransport {
    pub fn new(broker: Arc<WaitBroker>) -> Self {
        Self {
            broker,
            outstanding: Mutex::new(HashMap::new()),
        }
    }

    /// Number of grants handed out and not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl ResourceTransport for LocalTransport {
    fn request_resources(
        &self,
        task: &TaskId,
        request: &ResourceRequest,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<Grant> {
        let grant = self.broker.submit(task, request, priority, timeout)?;
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(grant.request_id.clone(), grant.clone());
        Ok(grant)
    }

    fn release_resources(&self, request_id: &RequestId) -> Result<()> {
        let grant = self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(request_id);
        let Some(grant) = grant else {
            tracing::debug!(request_id = %request_id, "release of unknown request ignored");
            return Ok(());
        };

        if let Err(e) = self.broker.engine().release(&grant) {
            // Keep the grant so the release can be retried.
            self.outstanding
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(request_id.clone(), grant);
            return Err(e);
        }

        self.broker.notify_released();
        Ok(())
    }
}
