//! # mbus-meter - Wired M-Bus Meter Polling and Consumption Reporting
//!
//! The mbus-meter crate polls a fixed roster of wired M-Bus meters over a
//! shared serial line, decodes their cumulative BCD counters, stores every
//! reading in SQLite and answers calendar-bucketed consumption reports.
//!
//! ## Features
//!
//! - Build REQ_UD2 requests and validate long-frame responses
//! - Resynchronize on a noisy byte stream within a fixed deadline
//! - Poll the roster round-robin as a cancellable background task
//! - Persist readings as an append-only time series
//! - Hourly, weekly, monthly, yearly, trend, comparison, peak,
//!   instantaneous and per-device history reports
//!
//! ## Usage
//!
//! ```rust,no_run
//! use mbus_meter::{PollerConfig, PollingController, ReportPeriod};
//!
//! # async fn run() -> Result<(), mbus_meter::MBusError> {
//! let mut controller = PollingController::open(PollerConfig::default()).await?;
//! controller.connect("/dev/ttyUSB0").await?;
//! controller.start_polling().await?;
//! let today = controller.report(ReportPeriod::Daily).await?;
//! println!("{:.2} m³ today", today.grand_total());
//! controller.stop_polling().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod controller;
pub mod error;
pub mod logging;
pub mod mbus;
pub mod poller;
pub mod report;
pub mod store;

pub use crate::config::PollerConfig;
pub use crate::controller::PollingController;
pub use crate::error::MBusError;
pub use crate::logging::{init_logger, init_logger_with_level, log_info};

pub use mbus::frame::{build_request, checksum, parse_frame, FrameLayout, ParsedReading};
pub use mbus::receiver::{FrameReceiver, ReceiveOutcome};
pub use mbus::serial::{SerialConfig, SerialTransport};
pub use mbus::serial_mock::{MockResponse, MockTransport};
pub use mbus::transport::Transport;
pub use poller::{DeviceLiveState, DeviceStatus, LiveSnapshot, Poller};
pub use report::{
    AggregationBucket, BucketReport, Clock, ComparisonPeriod, FixedClock, ReportEngine, ReportPeriod,
    SystemClock,
};
pub use store::{Reading, ReadingStore};

/// Connect to the meter bus via serial port.
///
/// # Arguments
/// * `port` - Serial port path (e.g., "/dev/ttyUSB0" on Linux, "COM3" on Windows)
///
/// # Returns
/// * `Ok(SerialTransport)` - Open transport, 9600 baud 8N1
/// * `Err(MBusError)` - The port could not be opened
pub async fn connect(port: &str) -> Result<SerialTransport, MBusError> {
    SerialTransport::open(port, &SerialConfig::default()).await
}

/// List the serial ports present on this host.
pub fn list_available_ports() -> Result<Vec<String>, MBusError> {
    mbus::serial::list_available_ports()
}
