//! Byte transport abstraction
//!
//! The receiver and the poller talk to the bus through this trait so that the
//! same code drives a real serial port or the scripted mock used in tests.

use crate::error::MBusError;
use std::time::Duration;

/// A half-duplex byte link to the meter bus.
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Discards bytes received but not yet read.
    async fn clear_input(&mut self) -> Result<(), MBusError>;

    /// Writes a complete frame and flushes it to the line.
    async fn send(&mut self, data: &[u8]) -> Result<(), MBusError>;

    /// Reads whatever is available into `buf`, waiting at most `wait`.
    ///
    /// Returns `Ok(0)` when nothing arrived in time; that is not an error.
    async fn read_available(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize, MBusError>;

    /// Human readable name of the link, used in log lines.
    fn name(&self) -> &str {
        "transport"
    }
}
