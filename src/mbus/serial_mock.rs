//! Mock serial transport for testing
//!
//! This module provides a scriptable [`Transport`] that plays the meter side
//! of the bus, so the receiver and the poller can be exercised without
//! hardware. Responses are keyed by the primary address found in each
//! request frame written to the mock.

use crate::error::MBusError;
use crate::mbus::frame::{build_response, FrameLayout};
use crate::mbus::transport::Transport;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// How the simulated meter at an address reacts to a request.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Reply with these bytes
    Bytes(Vec<u8>),
    /// Never reply
    Silent,
    /// Fail the write with a transport error
    Fault(String),
}

#[derive(Debug, Default)]
struct MockState {
    rx: VecDeque<u8>,
    tx: Vec<Vec<u8>>,
    responses: HashMap<u8, MockResponse>,
    chunk_size: Option<usize>,
    read_fault: Option<String>,
}

/// Mock serial port that simulates the meters on a bus.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue raw bytes to be read from the port.
    pub fn queue_rx_data(&self, data: &[u8]) {
        self.state().rx.extend(data);
    }

    /// Script the reply of the meter at `address`.
    pub fn set_response(&self, address: u8, response: MockResponse) {
        self.state().responses.insert(address, response);
    }

    /// Script a valid reading for the meter at `address`.
    pub fn set_reading(&self, address: u8, device_id: [u8; 4], hundredths: u32) {
        let frame = build_response(address, device_id, hundredths, &FrameLayout::default());
        self.set_response(address, MockResponse::Bytes(frame));
    }

    /// Deliver at most `chunk` bytes per read call.
    pub fn set_chunk_size(&self, chunk: usize) {
        self.state().chunk_size = Some(chunk.max(1));
    }

    /// Fail every subsequent read with a transport error.
    pub fn set_read_fault(&self, message: &str) {
        self.state().read_fault = Some(message.to_string());
    }

    /// Frames written to the port, in order.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.state().tx.clone()
    }

    /// Bytes still waiting to be read.
    pub fn pending_rx(&self) -> usize {
        self.state().rx.len()
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn clear_input(&mut self) -> Result<(), MBusError> {
        self.state().rx.clear();
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<(), MBusError> {
        let mut state = self.state();
        state.tx.push(data.to_vec());

        // Request layout: 68 02 02 68 5B <address> <checksum> 16
        let Some(&address) = data.get(5) else {
            return Ok(());
        };
        match state.responses.get(&address).cloned() {
            Some(MockResponse::Bytes(bytes)) => state.rx.extend(bytes),
            Some(MockResponse::Fault(message)) => return Err(MBusError::SerialPortError(message)),
            Some(MockResponse::Silent) | None => {}
        }
        Ok(())
    }

    async fn read_available(&mut self, buf: &mut [u8], wait: Duration) -> Result<usize, MBusError> {
        let n = {
            let mut state = self.state();
            if let Some(message) = state.read_fault.clone() {
                return Err(MBusError::SerialPortError(message));
            }
            let limit = state.chunk_size.unwrap_or(usize::MAX).min(buf.len());
            let n = limit.min(state.rx.len());
            for (slot, byte) in buf.iter_mut().zip(state.rx.drain(..n)) {
                *slot = byte;
            }
            n
        };
        if n == 0 {
            // A quiet line costs the full wait, as a real port would.
            tokio::time::sleep(wait).await;
        }
        Ok(n)
    }

    fn name(&self) -> &str {
        "mock"
    }
}
