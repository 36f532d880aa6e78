//! Tests for config functionality.

use crate::config::{Config, StoreBackend};
use crate::request::Priority;
use std::time::Duration;

#[test]
fn test_default_config() {
    let config = Config::default();

    assert_eq!(config.backend, StoreBackend::File);
    assert_eq!(config.ledger_dir, ".labslot");
    assert!(config.event_log);
    assert_eq!(config.lock_wait_ms, 10_000);
    assert_eq!(config.lock_retry_ms, 5);
    assert_eq!(config.decision_lock_stale_secs, 60);
    assert_eq!(config.position_stale_minutes, 720);
    assert_eq!(config.sweep_interval_ms, 500);
    assert_eq!(config.default_priority, 20);
    assert!(config.validate().is_ok());
}

#[test]
fn test_parse_minimal_yaml() {
    let config = Config::from_yaml("").unwrap();

    // Should use all defaults
    assert_eq!(config.backend, StoreBackend::File);
    assert_eq!(config.sweep_interval_ms, 500);
}

#[test]
fn test_parse_partial_yaml() {
    let yaml = r#"
backend: memory
default_priority: 30
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert_eq!(config.backend, StoreBackend::Memory);
    assert_eq!(config.default_priority(), Priority(30));

    // Unspecified values should use defaults
    assert_eq!(config.ledger_dir, ".labslot");
    assert_eq!(config.lock_wait_ms, 10_000);
}

#[test]
fn test_parse_full_yaml() {
    let yaml = r#"
backend: file
ledger_dir: /var/lib/lab/ledger
event_log: false
lock_wait_ms: 2000
lock_retry_ms: 20
decision_lock_stale_secs: 30
position_stale_minutes: 60
sweep_interval_ms: 250
default_priority: 10
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert_eq!(config.ledger_dir, "/var/lib/lab/ledger");
    assert!(!config.event_log);
    assert_eq!(config.sweep_interval(), Duration::from_millis(250));
    assert_eq!(config.position_stale_after(), chrono::Duration::minutes(60));

    let lock = config.lock_options();
    assert_eq!(lock.wait, Duration::from_millis(2000));
    assert_eq!(lock.retry, Duration::from_millis(20));
    assert_eq!(lock.stale_after, Duration::from_secs(30));
}

#[test]
fn test_unknown_fields_are_ignored() {
    let yaml = r#"
sweep_interval_ms: 100
some_future_setting: true
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.sweep_interval_ms, 100);
}

#[test]
fn test_invalid_backend_fails_to_parse() {
    let result = Config::from_yaml("backend: postgres");
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("parse config"));
}

#[test]
fn test_validate_zero_values_fail() {
    for field in [
        "lock_wait_ms",
        "lock_retry_ms",
        "sweep_interval_ms",
        "decision_lock_stale_secs",
        "position_stale_minutes",
    ] {
        let result = Config::from_yaml(&format!("{}: 0", field));
        let err = result.unwrap_err();
        assert!(
            err.to_string().contains(field),
            "error for {} should name the field: {}",
            field,
            err
        );
    }
}

#[test]
fn test_validate_retry_longer_than_wait_fails() {
    let yaml = r#"
lock_wait_ms: 10
lock_retry_ms: 50
"#;
    let err = Config::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("must not exceed"));
}

#[test]
fn test_validate_empty_ledger_dir_fails() {
    let err = Config::from_yaml("ledger_dir: \"  \"").unwrap_err();
    assert!(err.to_string().contains("ledger_dir"));
}

#[test]
fn test_yaml_roundtrip() {
    let config = Config {
        backend: StoreBackend::Memory,
        default_priority: 100,
        ..Config::default()
    };

    let yaml = config.to_yaml().unwrap();
    let parsed = Config::from_yaml(&yaml).unwrap();

    assert_eq!(parsed.backend, StoreBackend::Memory);
    assert_eq!(parsed.default_priority, 100);
}

#[test]
fn test_load_from_file() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let path = temp_dir.path().join("labslot.yaml");
    std::fs::write(&path, "sweep_interval_ms: 42\n").unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.sweep_interval_ms, 42);

    let missing = Config::load(temp_dir.path().join("missing.yaml"));
    assert!(missing.unwrap_err().to_string().contains("failed to read"));
}
