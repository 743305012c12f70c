//! # Polling Controller
//!
//! This module provides the [`PollingController`], the main entry point used
//! by front ends: it owns the transport while the poller is idle, runs the
//! poller as a cancellable background task, and exposes the reports.
//!
//! While polling, the background task owns both the poller and the
//! transport. Stopping cancels the task and takes both back once it has
//! exited, so a transport is never driven from two places.

use crate::config::PollerConfig;
use crate::error::MBusError;
use crate::mbus::serial::{list_available_ports, SerialTransport};
use crate::mbus::transport::Transport;
use crate::poller::{LiveSnapshot, Poller};
use crate::report::{
    BucketReport, Clock, ComparisonPeriod, DeviceHistory, DeviceTotal, InstantConsumption, ReportEngine,
    ReportPeriod, TrendPoint,
};
use crate::store::{Reading, ReadingStore};
use log::{error, info};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

type PollerTask = JoinHandle<(Poller, Box<dyn Transport>)>;

/// Start/stop control over the poller plus the report entry points.
pub struct PollingController {
    config: PollerConfig,
    store: ReadingStore,
    reports: ReportEngine,
    /// Present while idle
    poller: Option<Poller>,
    /// Present while idle and connected
    transport: Option<Box<dyn Transport>>,
    task: Option<(PollerTask, CancellationToken)>,
    live: watch::Receiver<LiveSnapshot>,
}

impl PollingController {
    /// Creates a controller over an already opened store.
    pub fn new(config: PollerConfig, store: ReadingStore) -> Result<Self, MBusError> {
        config.validate()?;
        let reports = ReportEngine::new(store.clone(), config.device_count);
        Ok(Self::assemble(config, store, reports))
    }

    /// Same as [`new`](Self::new) with reports anchored to `clock`.
    pub fn with_clock(
        config: PollerConfig,
        store: ReadingStore,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, MBusError> {
        config.validate()?;
        let reports = ReportEngine::with_clock(store.clone(), config.device_count, clock);
        Ok(Self::assemble(config, store, reports))
    }

    /// Opens the database named in the configuration and creates a controller.
    pub async fn open(config: PollerConfig) -> Result<Self, MBusError> {
        let store = ReadingStore::open(&config.database_path).await?;
        Self::new(config, store)
    }

    fn assemble(config: PollerConfig, store: ReadingStore, reports: ReportEngine) -> Self {
        let poller = Poller::new(config.clone(), store.clone());
        let live = poller.subscribe();
        PollingController {
            config,
            store,
            reports,
            poller: Some(poller),
            transport: None,
            task: None,
            live,
        }
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn store(&self) -> &ReadingStore {
        &self.store
    }

    pub fn reports(&self) -> &ReportEngine {
        &self.reports
    }

    pub fn is_running(&self) -> bool {
        self.task
            .as_ref()
            .is_some_and(|(handle, _)| !handle.is_finished())
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some() || self.is_running()
    }

    /// Receiver of the live snapshots published by the poller.
    pub fn subscribe(&self) -> watch::Receiver<LiveSnapshot> {
        self.live.clone()
    }

    /// Copy of the latest published live state.
    pub fn snapshot(&self) -> LiveSnapshot {
        self.live.borrow().clone()
    }

    pub fn list_available_ports(&self) -> Result<Vec<String>, MBusError> {
        list_available_ports()
    }

    /// Opens a serial port and uses it as the bus transport.
    pub async fn connect(&mut self, port_name: &str) -> Result<(), MBusError> {
        let port_name = port_name.to_string();
        let settings = self.config.serial.clone();
        self.connect_with(|| async move {
            let transport = SerialTransport::open(&port_name, &settings).await?;
            Ok::<_, MBusError>(Box::new(transport) as Box<dyn Transport>)
        })
        .await
    }

    /// Installs `transport`, replacing the current one. A running poller is
    /// stopped, handed the new transport and restarted.
    pub async fn connect_transport(&mut self, transport: Box<dyn Transport>) -> Result<(), MBusError> {
        self.connect_with(|| async move { Ok(transport) }).await
    }

    /// Replaces the transport with the one returned by `open`.
    ///
    /// The current transport is stopped and dropped before `open` runs, so a
    /// port opened exclusively can be reopened. If `open` fails the
    /// controller is left disconnected and idle.
    pub async fn connect_with<F, Fut>(&mut self, open: F) -> Result<(), MBusError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Box<dyn Transport>, MBusError>>,
    {
        let was_running = self.is_running();
        if was_running {
            self.stop_polling().await?;
        }
        if let Some(old) = self.transport.take() {
            info!("Releasing bus transport {}", old.name());
        }

        let transport = open().await?;
        info!("Bus transport set to {}", transport.name());
        self.transport = Some(transport);
        if was_running {
            self.start_polling().await?;
        }
        Ok(())
    }

    /// Starts the background poller. Calling it while polling is a no-op.
    ///
    /// Without a connected transport the configured port is opened; with
    /// neither, [`MBusError::NotConnected`] is returned.
    pub async fn start_polling(&mut self) -> Result<(), MBusError> {
        if self.is_running() {
            return Ok(());
        }
        // A task that ended on its own still holds the poller
        if self.task.is_some() {
            self.stop_polling().await?;
        }

        let transport: Box<dyn Transport> = match self.transport.take() {
            Some(transport) => transport,
            None => match self.config.port.clone() {
                Some(port) => Box::new(SerialTransport::open(&port, &self.config.serial).await?),
                None => return Err(MBusError::NotConnected),
            },
        };
        let Some(poller) = self.poller.take() else {
            self.transport = Some(transport);
            return Err(MBusError::Other("poller is not available".into()));
        };

        let token = CancellationToken::new();
        let handle = tokio::spawn(poller.run(transport, token.clone()));
        self.task = Some((handle, token));
        Ok(())
    }

    /// Cancels the poller and waits for it to hand back the transport.
    pub async fn stop_polling(&mut self) -> Result<(), MBusError> {
        let Some((handle, token)) = self.task.take() else {
            return Ok(());
        };
        token.cancel();
        match handle.await {
            Ok((poller, transport)) => {
                self.poller = Some(poller);
                self.transport = Some(transport);
                Ok(())
            }
            Err(e) => {
                error!("Poller task failed: {}", e);
                let poller = Poller::new(self.config.clone(), self.store.clone());
                self.live = poller.subscribe();
                self.poller = Some(poller);
                Err(MBusError::Other(format!("poller task failed: {e}")))
            }
        }
    }

    pub async fn report(&self, period: ReportPeriod) -> Result<BucketReport, MBusError> {
        self.reports.bucket_report(period).await
    }

    pub async fn trend(&self, days: u32) -> Result<Vec<TrendPoint>, MBusError> {
        self.reports.trend(days).await
    }

    pub async fn comparison(&self, period: ComparisonPeriod) -> Result<Vec<DeviceTotal>, MBusError> {
        self.reports.comparison(period).await
    }

    /// Peak reading at or above `threshold`, or the configured default threshold.
    pub async fn peak(&self, threshold: Option<f64>) -> Result<Option<Reading>, MBusError> {
        self.reports
            .peak(threshold.unwrap_or(self.config.peak_threshold))
            .await
    }

    pub async fn instantaneous(&self) -> Result<Vec<InstantConsumption>, MBusError> {
        self.reports.instantaneous().await
    }

    pub async fn device_history(&self, address: u8, days: u32) -> Result<DeviceHistory, MBusError> {
        self.reports.device_history(address, days).await
    }

    pub async fn latest_readings(&self) -> Result<Vec<Reading>, MBusError> {
        self.reports.latest_readings().await
    }
}

impl Drop for PollingController {
    fn drop(&mut self) {
        if let Some((_, token)) = &self.task {
            token.cancel();
        }
    }
}
