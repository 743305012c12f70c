//! M-Bus Protocol Constants
//!
//! This module defines the wire constants of the framed request/response
//! exchange and the default bus timing used by the poller.

/// Start marker of a long frame (bytes 0 and 3 of the header)
pub const MBUS_FRAME_LONG_START: u8 = 0x68;

/// Stop marker closing every frame
pub const MBUS_FRAME_STOP: u8 = 0x16;

/// REQ_UD2 control byte (request class 2 data, DIR M2S)
pub const MBUS_CONTROL_MASK_REQ_UD2: u8 = 0x5B;

/// RSP_UD control byte of a meter response (DIR S2M)
pub const MBUS_CONTROL_MASK_RSP_UD: u8 = 0x08;

/// Data identifier of a variable data response
pub const MBUS_CONTROL_INFO_RESP_VARIABLE: u8 = 0x72;

/// Payload length of a request frame (control + address)
pub const MBUS_REQUEST_PAYLOAD_LENGTH: u8 = 2;

/// Total length of a request frame on the wire
pub const MBUS_REQUEST_FRAME_LENGTH: usize = 8;

/// Bytes before the payload: start, length, length, start
pub const MBUS_FRAME_HEADER_LENGTH: usize = 4;

/// Bytes after the payload: checksum, stop
pub const MBUS_FRAME_TRAILER_LENGTH: usize = 2;

/// Shortest byte sequence that can possibly be a long frame
pub const MBUS_FRAME_MIN_LENGTH: usize = MBUS_FRAME_HEADER_LENGTH + MBUS_FRAME_TRAILER_LENGTH + 1;

/// Control, address and data identifier are mandatory in a response payload
pub const MBUS_RESPONSE_MIN_PAYLOAD: usize = 3;

/// Payload length from which a device id field is present
pub const MBUS_RESPONSE_ID_PAYLOAD: usize = 7;

/// Width of the device id field
pub const MBUS_DEVICE_ID_LENGTH: usize = 4;

/// Width of the BCD value field
pub const MBUS_BCD_VALUE_LENGTH: usize = 4;

/// Default offset of the device id field inside the payload
pub const MBUS_DEFAULT_ID_OFFSET: usize = 3;

/// Default offset of the BCD value field inside the payload
pub const MBUS_DEFAULT_VALUE_OFFSET: usize = 7;

/// Implied decimal digits of the BCD value (hundredths of a cubic meter)
pub const MBUS_VALUE_SCALE: f64 = 100.0;

// ----------------------------------------------------------------------------
// Bus defaults
// ----------------------------------------------------------------------------

pub const DEFAULT_BAUDRATE: u32 = 9600;
pub const DEFAULT_DEVICE_COUNT: u8 = 8;
pub const DEFAULT_FRAME_TIMEOUT_MS: u64 = 2000;
pub const DEFAULT_READ_SLICE_MS: u64 = 50;
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 500;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5000;
pub const DEFAULT_IDLE_TICK_MS: u64 = 500;
pub const DEFAULT_PORT_OPEN_SETTLE_MS: u64 = 2000;
pub const DEFAULT_DATABASE_PATH: &str = "mbus_data.db";

/// Default threshold of the peak usage report, in cubic meters
pub const DEFAULT_PEAK_THRESHOLD: f64 = 300.0;

/// Highest primary address a roster may contain
pub const MBUS_MAX_PRIMARY_ADDRESS: u8 = 250;

/// Allowed window of the per-device history report, in days
pub const HISTORY_MIN_DAYS: u32 = 7;
pub const HISTORY_MAX_DAYS: u32 = 60;
