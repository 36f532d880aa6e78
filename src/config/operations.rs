//! Config loading, validation, and utility operations.

use super::model::Config;
use crate::error::{LabError, Result};
use crate::locks::LockOptions;
use crate::request::Priority;
use std::path::Path;
use std::time::Duration;

impl Config {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully loaded and validated config
    /// * `Err(LabError::Validation)` - Read error, parse error or invalid value
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            LabError::Validation(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| LabError::Validation(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| LabError::Store(format!("failed to serialize config to YAML: {}", e)))
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - `ledger_dir` must be non-empty
    /// - `lock_wait_ms`, `lock_retry_ms`, `sweep_interval_ms` must be positive
    /// - `lock_retry_ms` must not exceed `lock_wait_ms`
    /// - `decision_lock_stale_secs` and `position_stale_minutes` must be positive
    pub fn validate(&self) -> Result<()> {
        if self.ledger_dir.trim().is_empty() {
            return Err(LabError::Validation(
                "config validation failed: ledger_dir must be non-empty".to_string(),
            ));
        }

        for (field, value) in [
            ("lock_wait_ms", self.lock_wait_ms),
            ("lock_retry_ms", self.lock_retry_ms),
            ("sweep_interval_ms", self.sweep_interval_ms),
            ("decision_lock_stale_secs", self.decision_lock_stale_secs),
            ("position_stale_minutes", self.position_stale_minutes as u64),
        ] {
            if value == 0 {
                return Err(LabError::Validation(format!(
                    "config validation failed: {} must be greater than 0",
                    field
                )));
            }
        }

        if self.lock_retry_ms > self.lock_wait_ms {
            return Err(LabError::Validation(format!(
                "config validation failed: lock_retry_ms ({}) must not exceed lock_wait_ms ({})",
                self.lock_retry_ms, self.lock_wait_ms
            )));
        }

        Ok(())
    }

    /// Lock acquisition settings derived from this config.
    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            wait: Duration::from_millis(self.lock_wait_ms),
            retry: Duration::from_millis(self.lock_retry_ms),
            stale_after: Duration::from_secs(self.decision_lock_stale_secs),
        }
    }

    /// Interval of the broker's periodic sweep.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Priority applied to requests that do not specify one.
    pub fn default_priority(&self) -> Priority {
        Priority(self.default_priority)
    }

    /// Age after which a held position lock counts as stale.
    pub fn position_stale_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.position_stale_minutes as i64)
    }
}
