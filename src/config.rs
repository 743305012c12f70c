//! # Poller Configuration
//!
//! Bus timing, roster size, frame layout and storage location, passed
//! explicitly into the poller, the store and the report engine. Files are
//! JSON; every field is optional and falls back to the defaults of a
//! 9600 baud bus with eight meters.
//!
//! ```json
//! {
//!   "port": "/dev/ttyUSB0",
//!   "serial": { "baudrate": 9600, "parity": "none" },
//!   "device_count": 8,
//!   "frame_timeout_ms": 2000,
//!   "layout": { "device_id_offset": 3, "value_offset": 7 }
//! }
//! ```

use crate::constants::{
    DEFAULT_DATABASE_PATH, DEFAULT_DEVICE_COUNT, DEFAULT_FRAME_TIMEOUT_MS, DEFAULT_IDLE_TICK_MS,
    DEFAULT_PEAK_THRESHOLD, DEFAULT_POLL_INTERVAL_MS, DEFAULT_READ_SLICE_MS,
    DEFAULT_SETTLE_DELAY_MS, MBUS_MAX_PRIMARY_ADDRESS,
};
use crate::error::MBusError;
use crate::mbus::frame::FrameLayout;
use crate::mbus::serial::SerialConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Serial port to open when polling starts without an explicit connect
    pub port: Option<String>,
    pub serial: SerialConfig,
    /// Roster size; meters are polled at addresses `1..=device_count`
    pub device_count: u8,
    pub frame_timeout_ms: u64,
    pub read_slice_ms: u64,
    pub settle_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub idle_tick_ms: u64,
    pub layout: FrameLayout,
    pub database_path: PathBuf,
    pub peak_threshold: f64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        PollerConfig {
            port: None,
            serial: SerialConfig::default(),
            device_count: DEFAULT_DEVICE_COUNT,
            frame_timeout_ms: DEFAULT_FRAME_TIMEOUT_MS,
            read_slice_ms: DEFAULT_READ_SLICE_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            idle_tick_ms: DEFAULT_IDLE_TICK_MS,
            layout: FrameLayout::default(),
            database_path: PathBuf::from(DEFAULT_DATABASE_PATH),
            peak_threshold: DEFAULT_PEAK_THRESHOLD,
        }
    }
}

impl PollerConfig {
    /// Loads and validates a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, MBusError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| MBusError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self, MBusError> {
        let config: PollerConfig =
            serde_json::from_str(text).map_err(|e| MBusError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), MBusError> {
        if self.device_count == 0 || self.device_count > MBUS_MAX_PRIMARY_ADDRESS {
            return Err(MBusError::Config(format!(
                "device_count must be within 1..={MBUS_MAX_PRIMARY_ADDRESS}, got {}",
                self.device_count
            )));
        }
        if self.frame_timeout_ms == 0 || self.read_slice_ms == 0 || self.idle_tick_ms == 0 {
            return Err(MBusError::Config(
                "frame_timeout_ms, read_slice_ms and idle_tick_ms must be non-zero".into(),
            ));
        }
        if self.serial.baudrate == 0 {
            return Err(MBusError::Config("baudrate must be non-zero".into()));
        }
        if self.layout.device_id_offset > u8::MAX as usize || self.layout.value_offset > u8::MAX as usize {
            return Err(MBusError::Config("frame layout offsets exceed the payload size".into()));
        }
        if !self.peak_threshold.is_finite() {
            return Err(MBusError::Config("peak_threshold must be a finite number".into()));
        }
        Ok(())
    }

    /// Addresses polled every cycle.
    pub fn roster(&self) -> impl Iterator<Item = u8> {
        1..=self.device_count
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn read_slice(&self) -> Duration {
        Duration::from_millis(self.read_slice_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn idle_tick(&self) -> Duration {
        Duration::from_millis(self.idle_tick_ms)
    }

    /// Number of idle ticks between cycles (at least one).
    pub fn idle_ticks(&self) -> u64 {
        (self.poll_interval_ms / self.idle_tick_ms.max(1)).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_bus() {
        let config = PollerConfig::default();
        assert_eq!(config.serial.baudrate, 9600);
        assert_eq!(config.roster().collect::<Vec<_>>(), (1..=8).collect::<Vec<u8>>());
        assert_eq!(config.frame_timeout(), Duration::from_secs(2));
        assert_eq!(config.idle_ticks(), 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = PollerConfig::from_json_str(r#"{"device_count": 4, "serial": {"parity": "even"}}"#)
            .unwrap();
        assert_eq!(config.device_count, 4);
        assert_eq!(config.serial.baudrate, 9600);
        assert_eq!(config.serial.parity, crate::mbus::serial::ParityMode::Even);
        assert_eq!(config.layout, FrameLayout::default());
    }

    #[test]
    fn test_rejects_empty_roster() {
        let err = PollerConfig::from_json_str(r#"{"device_count": 0}"#).unwrap_err();
        assert!(matches!(err, MBusError::Config(_)));
    }
}
