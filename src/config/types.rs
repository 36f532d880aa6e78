//! Configuration types and defaults for labslot.
//!
//! This module defines enums, constants, and default value functions
//! used by the Config struct.

use serde::{Deserialize, Serialize};

/// Which document store backs the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// One JSON file per document under `ledger_dir` (default, shared across processes).
    #[default]
    File,
    /// Process-local ordered maps (tests, single-process simulations).
    Memory,
}

// Default value functions for serde
pub(crate) fn default_ledger_dir() -> String {
    ".labslot".to_string()
}
pub(crate) fn default_lock_wait_ms() -> u64 {
    10_000
}
pub(crate) fn default_lock_retry_ms() -> u64 {
    5
}
pub(crate) fn default_decision_lock_stale_secs() -> u64 {
    60
}
pub(crate) fn default_position_stale_minutes() -> u32 {
    720
}
pub(crate) fn default_sweep_interval_ms() -> u64 {
    500
}
pub(crate) fn default_priority() -> u32 {
    20
}
pub(crate) fn default_true() -> bool {
    true
}
