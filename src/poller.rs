//! # Meter Poller
//!
//! Round-robin REQ_UD2 polling of the meter roster. Each address gets its own
//! request/response exchange; whatever goes wrong for one meter is recorded in
//! that meter's [`DeviceLiveState`] and the cycle moves on to the next one.
//!
//! The poller owns the live state exclusively. Readers receive copies through
//! a `tokio::sync::watch` channel, published after every device and every
//! cycle.

use crate::config::PollerConfig;
use crate::error::MBusError;
use crate::logging::log_frame_hex;
use crate::mbus::frame::{build_request, parse_frame, ParsedReading};
use crate::mbus::receiver::{FrameReceiver, ReceiveOutcome};
use crate::mbus::transport::Transport;
use crate::store::ReadingStore;
use chrono::{Local, NaiveDateTime};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Outcome of the last exchange with a meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceStatus {
    Unpolled,
    Ok,
    ChecksumError,
    FramingError,
    NoResponse,
    TransportError,
}

impl DeviceStatus {
    fn from_error(err: &MBusError) -> Self {
        match err {
            MBusError::Timeout(_) => DeviceStatus::NoResponse,
            MBusError::InvalidChecksum { .. } => DeviceStatus::ChecksumError,
            MBusError::FrameParseError(_) | MBusError::InvalidBcd(_) => DeviceStatus::FramingError,
            _ => DeviceStatus::TransportError,
        }
    }
}

/// Per-address state shown in the live table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceLiveState {
    pub address: u8,
    pub last_value: Option<f64>,
    pub last_device_id: Option<String>,
    pub status: DeviceStatus,
}

impl DeviceLiveState {
    pub fn new(address: u8) -> Self {
        DeviceLiveState {
            address,
            last_value: None,
            last_device_id: None,
            status: DeviceStatus::Unpolled,
        }
    }

    /// Value cell of the live table: the reading, `ERR` or `---`.
    pub fn display_value(&self) -> String {
        match (self.status, self.last_value) {
            (DeviceStatus::Ok, Some(value)) => format!("{value:.2}"),
            (DeviceStatus::ChecksumError | DeviceStatus::FramingError | DeviceStatus::TransportError, _) => {
                "ERR".to_string()
            }
            _ => "---".to_string(),
        }
    }

    /// Device id cell of the live table.
    pub fn display_id(&self) -> String {
        self.last_device_id.clone().unwrap_or_else(|| "----".to_string())
    }

    fn record(&mut self, reading: &ParsedReading) {
        self.last_value = Some(reading.value);
        self.last_device_id = Some(reading.device_id_hex());
        self.status = DeviceStatus::Ok;
    }

    fn fail(&mut self, status: DeviceStatus) {
        self.last_value = None;
        self.last_device_id = None;
        self.status = status;
    }
}

/// Copy of the poller's live state handed to readers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveSnapshot {
    pub devices: Vec<DeviceLiveState>,
    /// Set at the end of every cycle in which at least one meter answered
    pub last_successful_read: Option<NaiveDateTime>,
    pub cycles: u64,
}

impl LiveSnapshot {
    pub fn new(device_count: u8) -> Self {
        LiveSnapshot {
            devices: (1..=device_count).map(DeviceLiveState::new).collect(),
            last_successful_read: None,
            cycles: 0,
        }
    }

    pub fn device(&self, address: u8) -> Option<&DeviceLiveState> {
        self.devices.iter().find(|d| d.address == address)
    }
}

/// Result of one pass over the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub polled: usize,
    pub updated: usize,
    pub cancelled: bool,
}

pub struct Poller {
    config: PollerConfig,
    store: ReadingStore,
    receiver: FrameReceiver,
    devices: Vec<DeviceLiveState>,
    last_successful_read: Option<NaiveDateTime>,
    cycles: u64,
    live: watch::Sender<LiveSnapshot>,
}

impl Poller {
    pub fn new(config: PollerConfig, store: ReadingStore) -> Self {
        let initial = LiveSnapshot::new(config.device_count);
        let (live, _) = watch::channel(initial.clone());
        Poller {
            receiver: FrameReceiver::new(config.frame_timeout(), config.read_slice()),
            devices: initial.devices,
            last_successful_read: None,
            cycles: 0,
            config,
            store,
            live,
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Receiver of the live snapshots.
    pub fn subscribe(&self) -> watch::Receiver<LiveSnapshot> {
        self.live.subscribe()
    }

    pub fn snapshot(&self) -> LiveSnapshot {
        LiveSnapshot {
            devices: self.devices.clone(),
            last_successful_read: self.last_successful_read,
            cycles: self.cycles,
        }
    }

    fn publish(&self) {
        self.live.send_replace(self.snapshot());
    }

    /// Request, settle, receive and decode one meter's reading.
    ///
    /// A valid frame carrying another address than the one polled is a
    /// [`MBusError::FrameParseError`]; its reading is neither recorded nor
    /// stored.
    async fn exchange(&self, transport: &mut dyn Transport, address: u8) -> Result<ParsedReading, MBusError> {
        transport.clear_input().await?;
        let request = build_request(address);
        log_frame_hex("request", &request);
        transport.send(&request).await?;
        tokio::time::sleep(self.config.settle_delay()).await;

        let bytes = match self.receiver.receive(transport).await? {
            ReceiveOutcome::Frame(bytes) => bytes,
            ReceiveOutcome::Truncated(bytes) => {
                debug!("address {}: frame truncated at the deadline", address);
                bytes
            }
            ReceiveOutcome::Timeout => return Err(MBusError::Timeout(self.receiver.deadline())),
        };
        log_frame_hex("response", &bytes);

        let reading = parse_frame(&bytes, &self.config.layout)?;
        if reading.address != address {
            return Err(MBusError::FrameParseError(format!(
                "polled address {} but address {} answered",
                address, reading.address
            )));
        }
        Ok(reading)
    }

    /// Polls one roster address and records the outcome.
    pub async fn poll_device(&mut self, transport: &mut dyn Transport, address: u8) -> DeviceStatus {
        let Some(index) = self.devices.iter().position(|d| d.address == address) else {
            warn!("address {} is not on the roster", address);
            return DeviceStatus::Unpolled;
        };

        let status = match self.exchange(transport, address).await {
            Ok(reading) => {
                self.devices[index].record(&reading);
                if let Err(e) = self.store.insert(address, reading.value).await {
                    error!("address {}: reading {:.2} not stored: {}", address, reading.value, e);
                }
                DeviceStatus::Ok
            }
            Err(err) => {
                let status = DeviceStatus::from_error(&err);
                match status {
                    DeviceStatus::NoResponse => debug!("address {}: {}", address, err),
                    _ => warn!("address {}: {}", address, err),
                }
                self.devices[index].fail(status);
                status
            }
        };
        self.publish();
        status
    }

    /// One pass over the roster. Stops early, between devices, when cancelled.
    pub async fn run_cycle(&mut self, transport: &mut dyn Transport, token: &CancellationToken) -> CycleSummary {
        let mut summary = CycleSummary {
            polled: 0,
            updated: 0,
            cancelled: false,
        };
        for address in self.config.roster() {
            if token.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            summary.polled += 1;
            if self.poll_device(transport, address).await == DeviceStatus::Ok {
                summary.updated += 1;
            }
        }

        if summary.updated > 0 {
            self.last_successful_read = Some(Local::now().naive_local());
        }
        self.cycles += 1;
        self.publish();
        info!(
            "cycle {}: {}/{} meters answered on {}",
            self.cycles,
            summary.updated,
            summary.polled,
            transport.name()
        );
        summary
    }

    /// Polls until cancelled, then hands back the poller and its transport.
    pub async fn run(
        mut self,
        mut transport: Box<dyn Transport>,
        token: CancellationToken,
    ) -> (Poller, Box<dyn Transport>) {
        info!("polling {} meters on {}", self.config.device_count, transport.name());
        while !token.is_cancelled() {
            self.run_cycle(transport.as_mut(), &token).await;
            for _ in 0..self.config.idle_ticks() {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(self.config.idle_tick()) => {}
                }
            }
        }
        info!("polling stopped on {}", transport.name());
        (self, transport)
    }
}
