//! Filesystem utilities for labslot.
//!
//! This module provides the atomic writes the file-backed ledger relies on
//! to keep every document whole across crashes and concurrent writers.

pub mod atomic;

pub use atomic::atomic_write;
