//! Configuration model for labslot.
//!
//! This module defines the Config struct that is built once at startup and
//! passed explicitly to every component. It supports forward-compatible YAML
//! parsing (unknown fields are ignored), sensible defaults for optional
//! fields, and validation of config values.

mod model;
mod operations;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export public API
pub use model::Config;
pub use types::StoreBackend;
