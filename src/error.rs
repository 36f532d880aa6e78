//! Error types for labslot.
//!
//! Uses thiserror for derive macros. Each variant is one class of failure
//! a caller has to handle differently; only contention (and a decision lock
//! that could not be taken in time) is worth retrying.

use thiserror::Error;

/// Main error type for ledger, reservation and facade operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabError {
    /// Malformed request, duplicate prefixes, or reserved characters in a name.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The total population behind a prefix can never satisfy the request.
    #[error("Insufficient capacity: {0}")]
    Capacity(String),

    /// Enough resources exist, but not enough are free right now.
    #[error("Resources busy: {0}")]
    Contention(String),

    /// Lock, move or release attempted against another task's resource.
    #[error("Ownership violation: {0}")]
    Ownership(String),

    /// Unknown position, sample, device or task.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A prefix resolved to more than one parent device.
    #[error("Ambiguous query: {0}")]
    Ambiguity(String),

    /// A queued request was not granted before its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The named advisory lock could not be acquired.
    #[error("Lock acquisition failed: {0}")]
    Lock(String),

    /// The backing store failed to read, write or decode a document.
    #[error("Store failure: {0}")]
    Store(String),

    /// An external collaborator (coordinator, device client, transport) failed.
    #[error("Collaborator failure: {0}")]
    Coordinator(String),
}

impl LabError {
    /// Whether retrying the same call later can succeed without changing it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LabError::Contention(_) | LabError::Lock(_))
    }
}

/// Result type alias for labslot operations.
pub type Result<T> = std::result::Result<T, LabError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_contention_and_lock_are_retryable() {
        assert!(LabError::Contention("busy".into()).is_retryable());
        assert!(LabError::Lock("held".into()).is_retryable());

        assert!(!LabError::Validation("bad".into()).is_retryable());
        assert!(!LabError::Capacity("too few".into()).is_retryable());
        assert!(!LabError::Ownership("not yours".into()).is_retryable());
        assert!(!LabError::NotFound("gone".into()).is_retryable());
        assert!(!LabError::Ambiguity("two".into()).is_retryable());
        assert!(!LabError::Timeout("late".into()).is_retryable());
    }

    #[test]
    fn error_messages_are_descriptive() {
        let err = LabError::Capacity("prefix `oven/tray` has 4 positions, 5 requested".into());
        assert_eq!(
            err.to_string(),
            "Insufficient capacity: prefix `oven/tray` has 4 positions, 5 requested"
        );

        let err = LabError::Validation("duplicate prefix `A`".into());
        assert_eq!(err.to_string(), "Validation failed: duplicate prefix `A`");
    }
}
