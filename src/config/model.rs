//! Config struct definition and default implementation.

use super::types::*;
use serde::{Deserialize, Serialize};

/// Configuration for a labslot deployment.
///
/// Built once at startup (usually from `labslot.yaml`) and handed to
/// [`crate::lab::Lab::open`]; every component reads the same value.
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Storage settings
    // =========================================================================
    /// Document store backend.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Root directory of the file-backed ledger (default: ".labslot").
    #[serde(default = "default_ledger_dir")]
    pub ledger_dir: String,

    /// Whether ledger mutations are appended to the NDJSON audit log.
    #[serde(default = "default_true")]
    pub event_log: bool,

    // =========================================================================
    // Lock settings
    // =========================================================================
    /// Longest time to wait for a named advisory lock before failing.
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,

    /// Poll interval while a named advisory lock is held by someone else.
    #[serde(default = "default_lock_retry_ms")]
    pub lock_retry_ms: u64,

    /// Age after which a file lock is considered abandoned and broken.
    #[serde(default = "default_decision_lock_stale_secs")]
    pub decision_lock_stale_secs: u64,

    /// Minutes after which a position lock is reported by `stale_locks`.
    #[serde(default = "default_position_stale_minutes")]
    pub position_stale_minutes: u32,

    // =========================================================================
    // Broker settings
    // =========================================================================
    /// Interval of the periodic retry sweep over pending requests.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Priority used when a request does not name one (20 = normal).
    #[serde(default = "default_priority")]
    pub default_priority: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            ledger_dir: default_ledger_dir(),
            event_log: default_true(),
            lock_wait_ms: default_lock_wait_ms(),
            lock_retry_ms: default_lock_retry_ms(),
            decision_lock_stale_secs: default_decision_lock_stale_secs(),
            position_stale_minutes: default_position_stale_minutes(),
            sweep_interval_ms: default_sweep_interval_ms(),
            default_priority: default_priority(),
        }
    }
}
