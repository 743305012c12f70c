//! # Frame Receiver
//!
//! Scans the byte stream coming from a [`Transport`] for one long frame,
//! within a fixed deadline measured from the first read attempt.
//!
//! The byte-level work is done by [`FrameAssembler`], a synchronous state
//! machine:
//!
//! - `Seeking`: leading bytes are dropped until one equals the start marker.
//! - `HeaderWait`: four bytes are needed to check `L == L` and the second
//!   start marker. On mismatch only the leading byte is dropped and seeking
//!   resumes, so a noise byte never costs more than itself.
//! - `BodyWait`: bytes accumulate until `4 + L + 2` are present.

use crate::constants::{MBUS_FRAME_HEADER_LENGTH, MBUS_FRAME_LONG_START};
use crate::error::MBusError;
use crate::mbus::frame::frame_length;
use crate::mbus::transport::Transport;
use bytes::{Buf, Bytes, BytesMut};
use log::{debug, trace};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    Seeking,
    HeaderWait,
    BodyWait { total_len: usize },
}

/// Incremental frame synchronizer over a byte stream.
#[derive(Debug)]
pub struct FrameAssembler {
    state: AssemblerState,
    buf: BytesMut,
    discarded: usize,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAssembler {
    pub fn new() -> Self {
        FrameAssembler {
            state: AssemblerState::Seeking,
            buf: BytesMut::with_capacity(256),
            discarded: 0,
        }
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    /// Number of noise bytes dropped while resynchronizing.
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Bytes still wanted to finish the frame in progress.
    pub fn wanted(&self) -> usize {
        match self.state {
            AssemblerState::Seeking => 1,
            AssemblerState::HeaderWait => MBUS_FRAME_HEADER_LENGTH.saturating_sub(self.buf.len()).max(1),
            AssemblerState::BodyWait { total_len } => total_len.saturating_sub(self.buf.len()).max(1),
        }
    }

    /// Appends received bytes.
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Advances the state machine; returns a complete frame when one is buffered.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            match self.state {
                AssemblerState::Seeking => {
                    let skip = self
                        .buf
                        .iter()
                        .position(|&b| b == MBUS_FRAME_LONG_START)
                        .unwrap_or(self.buf.len());
                    if skip > 0 {
                        trace!("dropping {} bytes while seeking start", skip);
                        self.buf.advance(skip);
                        self.discarded += skip;
                    }
                    if self.buf.is_empty() {
                        return None;
                    }
                    self.state = AssemblerState::HeaderWait;
                }
                AssemblerState::HeaderWait => {
                    if self.buf.len() < MBUS_FRAME_HEADER_LENGTH {
                        return None;
                    }
                    if self.buf[1] == self.buf[2] && self.buf[3] == MBUS_FRAME_LONG_START {
                        self.state = AssemblerState::BodyWait {
                            total_len: frame_length(self.buf[1]),
                        };
                    } else {
                        self.buf.advance(1);
                        self.discarded += 1;
                        self.state = AssemblerState::Seeking;
                    }
                }
                AssemblerState::BodyWait { total_len } => {
                    if self.buf.len() < total_len {
                        return None;
                    }
                    self.state = AssemblerState::Seeking;
                    return Some(self.buf.split_to(total_len).freeze());
                }
            }
        }
    }

    /// The partial frame held when input stopped, if a valid header was seen.
    pub fn take_partial(&mut self) -> Option<Bytes> {
        match self.state {
            AssemblerState::BodyWait { .. } => {
                self.state = AssemblerState::Seeking;
                Some(self.buf.split().freeze())
            }
            _ => None,
        }
    }
}

/// Terminal outcome of one receive attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// A complete frame, length consistent with its header
    Frame(Bytes),
    /// A valid header arrived but the body was incomplete at the deadline
    Truncated(Bytes),
    /// Nothing frame-like arrived before the deadline
    Timeout,
}

/// Reads one frame from a transport within a deadline.
#[derive(Debug, Clone)]
pub struct FrameReceiver {
    deadline: Duration,
    read_slice: Duration,
}

impl FrameReceiver {
    /// `deadline` bounds the whole receive; `read_slice` bounds each read call.
    pub fn new(deadline: Duration, read_slice: Duration) -> Self {
        FrameReceiver {
            deadline,
            read_slice: read_slice.max(Duration::from_millis(1)),
        }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Waits for a frame. Transport faults are returned as errors; silence is
    /// [`ReceiveOutcome::Timeout`].
    pub async fn receive(&self, transport: &mut dyn Transport) -> Result<ReceiveOutcome, MBusError> {
        let started = Instant::now();
        let mut assembler = FrameAssembler::new();
        let mut chunk = [0u8; 256];

        loop {
            let elapsed = started.elapsed();
            if elapsed >= self.deadline {
                break;
            }
            let wait = (self.deadline - elapsed).min(self.read_slice);
            let want = assembler.wanted().min(chunk.len());
            let n = transport.read_available(&mut chunk[..want], wait).await?;
            if n == 0 {
                continue;
            }
            assembler.push(&chunk[..n]);
            if let Some(frame) = assembler.next_frame() {
                if assembler.discarded() > 0 {
                    debug!(
                        "{}: resynchronized after {} noise bytes",
                        transport.name(),
                        assembler.discarded()
                    );
                }
                return Ok(ReceiveOutcome::Frame(frame));
            }
        }

        Ok(match assembler.take_partial() {
            Some(partial) => ReceiveOutcome::Truncated(partial),
            None => ReceiveOutcome::Timeout,
        })
    }
}
