//! Lock type definitions and information structures.

use super::metadata::LockMetadata;
use std::path::PathBuf;
use std::time::Duration;

/// Prefix of per-document lock names.
pub const DOCUMENT_LOCK_PREFIX: &str = "doc:";

/// Type of lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockType {
    /// Named section serializing a multi-document decision (e.g. `reservation`).
    Section,
    /// Per-document lock serializing one read-modify-write.
    Document,
}

impl LockType {
    /// Classify a lock by its name.
    pub fn of(name: &str) -> Self {
        if name.starts_with(DOCUMENT_LOCK_PREFIX) {
            LockType::Document
        } else {
            LockType::Section
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LockType::Section => "section",
            LockType::Document => "document",
        }
    }
}

/// How long and how often to try for a held lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Give up after waiting this long.
    pub wait: Duration,
    /// Poll interval while the lock is held by someone else.
    pub retry: Duration,
    /// A lock file older than this is considered abandoned and broken.
    pub stale_after: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(10),
            retry: Duration::from_millis(5),
            stale_after: Duration::from_secs(60),
        }
    }
}

/// Information about an active lock.
#[derive(Debug, Clone)]
pub struct LockInfo {
    /// The lock file path.
    pub path: PathBuf,

    /// The lock name (e.g., "reservation", "doc:positions:A1").
    pub name: String,

    /// The lock type.
    pub lock_type: LockType,

    /// The lock metadata.
    pub metadata: LockMetadata,

    /// Whether the lock is stale.
    pub is_stale: bool,
}

impl std::fmt::Display for LockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (owner: {}, age: {}, action: {}{})",
            self.name,
            self.metadata.owner,
            self.metadata.age_string(),
            self.metadata.action,
            if self.is_stale { ", STALE" } else { "" }
        )
    }
}
