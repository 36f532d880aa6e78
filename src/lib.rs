//! Labslot: resource reservation and location locking for automated labs.
//!
//! Concurrent task processes share one ledger of positions, samples and
//! devices. A task asks for a bundle of resources, waits in a priority queue
//! until the whole bundle is free, holds it exclusively, and releases it when
//! its scope ends.
//!
//! The layers, bottom up:
//! - [`store`]: document store with named locks (file-backed or in memory)
//! - [`ledger`]: typed positions, samples and devices
//! - [`occupancy`], [`matcher`]: derived status and prefix candidates
//! - [`reservation`]: all-or-nothing reservation decisions
//! - [`broker`]: priority wait queue over the reservation engine
//! - [`transport`], [`lab`], [`lab_view`]: what a task process uses

pub mod broker;
pub mod collaborators;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod fs;
pub mod lab;
pub mod lab_view;
pub mod ledger;
pub mod locks;
pub mod matcher;
pub mod occupancy;
pub mod request;
pub mod reservation;
pub mod store;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use error::{LabError, Result};
pub use lab::Lab;
pub use lab_view::{LabView, ResourceScope};
pub use request::{DeviceSelector, PositionRequest, Priority, ResourceRequest};
pub use reservation::{Grant, ReservationEngine, ReserveOutcome};
