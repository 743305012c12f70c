//! # M-Bus Error Handling
//!
//! This module defines the MBusError enum, which represents the different error
//! types that can occur while polling meters and querying their readings.

use std::time::Duration;
use thiserror::Error;

/// Represents the different error types that can occur in the crate.
#[derive(Debug, Error)]
pub enum MBusError {
    /// Indicates an error related to the serial port communication.
    #[error("Serial port error: {0}")]
    SerialPortError(String),

    /// Indicates a malformed frame (markers, lengths or payload layout).
    #[error("Error parsing M-Bus frame: {0}")]
    FrameParseError(String),

    /// Indicates a checksum mismatch on an otherwise well-formed frame.
    #[error("Invalid checksum: received {received:02X}, calculated {calculated:02X}")]
    InvalidChecksum { received: u8, calculated: u8 },

    /// Indicates a BCD byte with a nibble outside 0-9.
    #[error("Invalid BCD byte: 0x{0:02X}")]
    InvalidBcd(u8),

    /// No complete frame arrived before the deadline.
    #[error("No response within {0:?}")]
    Timeout(Duration),

    /// Polling was requested without a transport.
    #[error("Not connected to a serial port")]
    NotConnected,

    /// Reading store failure.
    #[error("Persistence error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// Invalid or unreadable configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A caller-supplied argument is out of range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A catch‑all error for uncategorized cases.
    #[error("Other error: {0}")]
    Other(String),
}

impl From<std::io::Error> for MBusError {
    fn from(err: std::io::Error) -> Self {
        MBusError::SerialPortError(err.to_string())
    }
}

impl From<tokio_serial::Error> for MBusError {
    fn from(err: tokio_serial::Error) -> Self {
        MBusError::SerialPortError(err.to_string())
    }
}

impl MBusError {
    /// True for errors raised while validating a received frame.
    pub fn is_frame_rejection(&self) -> bool {
        matches!(
            self,
            MBusError::FrameParseError(_) | MBusError::InvalidChecksum { .. } | MBusError::InvalidBcd(_)
        )
    }
}
