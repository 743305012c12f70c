//! The mbus module contains the components responsible for the wire side of
//! the meter bus: frame building and parsing, frame synchronization over a
//! byte stream, and the transports that carry the bytes.

pub mod frame;
pub mod receiver;
pub mod serial;
pub mod serial_mock;
pub mod transport;

pub use frame::{build_request, checksum, parse_frame, FrameLayout, ParsedReading};
pub use receiver::{FrameAssembler, FrameReceiver, ReceiveOutcome};
pub use serial::{list_available_ports, SerialConfig, SerialTransport};
pub use serial_mock::{MockResponse, MockTransport};
pub use transport::Transport;
