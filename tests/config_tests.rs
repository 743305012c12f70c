//! Tests for loading and validating the poller configuration.

use mbus_meter::mbus::serial::ParityMode;
use mbus_meter::{MBusError, PollerConfig};
use std::io::Write;
use std::time::Duration;

/// Tests that a configuration file overrides only the fields it names.
#[test]
fn test_load_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "port": "/dev/ttyUSB1",
            "serial": {{ "baudrate": 2400, "parity": "even" }},
            "device_count": 12,
            "poll_interval_ms": 10000,
            "layout": {{ "value_offset": 5 }},
            "database_path": "/var/lib/mbus/readings.db"
        }}"#
    )
    .unwrap();

    let config = PollerConfig::from_json_file(file.path()).unwrap();
    assert_eq!(config.port.as_deref(), Some("/dev/ttyUSB1"));
    assert_eq!(config.serial.baudrate, 2400);
    assert_eq!(config.serial.parity, ParityMode::Even);
    assert_eq!(config.serial.open_settle_ms, 2000);
    assert_eq!(config.roster().last(), Some(12));
    assert_eq!(config.idle_ticks(), 20);
    assert_eq!(config.layout.device_id_offset, 3);
    assert_eq!(config.layout.value_offset, 5);
    assert_eq!(config.frame_timeout(), Duration::from_secs(2));
    assert_eq!(config.settle_delay(), Duration::from_millis(500));
    assert_eq!(config.peak_threshold, 300.0);
}

/// Tests that a missing file is a configuration error.
#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = PollerConfig::from_json_file(dir.path().join("absent.json")).unwrap_err();
    assert!(matches!(err, MBusError::Config(_)));
}

/// Tests that malformed JSON and out-of-range values are rejected.
#[test]
fn test_invalid_values() {
    assert!(matches!(
        PollerConfig::from_json_str("{ device_count: }"),
        Err(MBusError::Config(_))
    ));
    assert!(matches!(
        PollerConfig::from_json_str(r#"{"device_count": 251}"#),
        Err(MBusError::Config(_))
    ));
    assert!(matches!(
        PollerConfig::from_json_str(r#"{"frame_timeout_ms": 0}"#),
        Err(MBusError::Config(_))
    ));
    assert!(matches!(
        PollerConfig::from_json_str(r#"{"serial": {"parity": "mark"}}"#),
        Err(MBusError::Config(_))
    ));
}

/// Tests that a configuration survives being written back out as JSON.
#[test]
fn test_serialize_defaults() {
    let config = PollerConfig::default();
    let text = serde_json::to_string(&config).unwrap();
    assert_eq!(PollerConfig::from_json_str(&text).unwrap(), config);
}
