//! # M-Bus Serial Communication
//!
//! This module provides the serial port implementation of [`Transport`],
//! including opening the port with the bus settings, clearing stale input
//! and bounded reads. It also lists the serial ports present on the host.

use crate::constants::{DEFAULT_BAUDRATE, DEFAULT_PORT_OPEN_SETTLE_MS};
use crate::error::MBusError;
use crate::mbus::transport::Transport;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt};

/// Parity setting of the serial line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParityMode {
    None,
    Even,
    Odd,
}

impl From<ParityMode> for tokio_serial::Parity {
    fn from(mode: ParityMode) -> Self {
        match mode {
            ParityMode::None => tokio_serial::Parity::None,
            ParityMode::Even => tokio_serial::Parity::Even,
            ParityMode::Odd => tokio_serial::Parity::Odd,
        }
    }
}

/// Configuration for serial connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub baudrate: u32,
    pub parity: ParityMode,
    /// Pause after opening the port before the first request (adapters reset on open)
    pub open_settle_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        SerialConfig {
            baudrate: DEFAULT_BAUDRATE,
            parity: ParityMode::None,
            open_settle_ms: DEFAULT_PORT_OPEN_SETTLE_MS,
        }
    }
}

/// Serial port link to the meter bus, 8 data bits and 1 stop bit.
pub struct SerialTransport {
    port: tokio_serial::SerialStream,
    name: String,
}

impl SerialTransport {
    /// Opens `port_name` with the given settings and waits for the adapter to settle.
    pub async fn open(port_name: &str, config: &SerialConfig) -> Result<SerialTransport, MBusError> {
        let port = tokio_serial::new(port_name, config.baudrate)
            .data_bits(tokio_serial::DataBits::Eight)
            .stop_bits(tokio_serial::StopBits::One)
            .parity(config.parity.into())
            .timeout(Duration::from_millis(500))
            .open_native_async()
            .map_err(|e| MBusError::SerialPortError(format!("{port_name}: {e}")))?;

        if config.open_settle_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.open_settle_ms)).await;
        }
        info!("Opened {} at {} baud", port_name, config.baudrate);

        Ok(SerialTransport {
            port,
            name: port_name.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl Transport for SerialTransport {
    async fn clear_input(&mut self) -> Result<(), MBusError> {
        self.port
            .clear(tokio_serial::ClearBuffer::Input)
            .map_err(|e| MBusError::SerialPortError(e.to_string()))
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), MBusError> {
        self.port
            .write_all(data)
            .await
            .map_err(|e| MBusError::SerialPortError(e.to_string()))?;
        self.port
            .flush()
            .await
            .map_err(|e| MBusError::SerialPortError(e.to_string()))
    }

    async fn read_available(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize, MBusError> {
        match tokio::time::timeout(wait, self.port.read(buf)).await {
            Err(_) => Ok(0),
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(MBusError::SerialPortError(e.to_string())),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Lists the serial ports present on this host.
pub fn list_available_ports() -> Result<Vec<String>, MBusError> {
    let ports = tokio_serial::available_ports()?;
    debug!("Found {} serial ports", ports.len());
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
