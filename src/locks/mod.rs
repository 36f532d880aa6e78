//! Locking subsystem for the file-backed ledger.
//!
//! This module implements the named advisory mutual-exclusion primitive the
//! reservation engine relies on:
//! - Named sections (`reservation.lock`) held for a whole check-then-commit decision
//! - Per-document locks (`doc:positions:A1`) held for one read-modify-write
//!
//! # Lock Files
//!
//! Lock files are stored in `{ledger_dir}/locks/`.
//! They are created using **create_new** semantics (exclusive create) so that
//! only one process or thread can hold a given lock at a time. Waiters poll
//! until the holder deletes the file.
//!
//! # Lock Metadata
//!
//! Each lock file contains JSON metadata:
//! - `owner`: The owner of the lock (e.g., `user@HOST`)
//! - `pid`: The process ID (optional)
//! - `created_at`: RFC3339 timestamp
//! - `action`: The action being performed (reserve/lock_position/update/...)
//!
//! # RAII Guards
//!
//! Locks are managed through RAII guard objects that automatically release
//! the lock when dropped. If deletion fails during drop, a warning is logged
//! but the program does not crash.

mod guard;
mod metadata;
mod operations;
mod types;


// Re-export public API
pub use guard::LockGuard;
pub use metadata::LockMetadata;
pub(crate) use metadata::get_owner_string;
pub use operations::{acquire_lock, clear_lock, list_locks, try_acquire_lock};
pub use types::{DOCUMENT_LOCK_PREFIX, LockInfo, LockOptions, LockType};
