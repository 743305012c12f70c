//! # M-Bus Frame Codec
//!
//! This module builds REQ_UD2 request frames and decodes the long response
//! frames returned by wired water meters. It leverages the `nom` crate for
//! splitting the header, payload and trailer of a received frame.
//!
//! ## Frame layout
//!
//! ```text
//! 0x68 | L | L | 0x68 | payload (L bytes) | checksum | 0x16
//! ```
//!
//! The checksum is the sum modulo 256 of the payload bytes. A response payload
//! carries `control, address, data identifier`, a 4-byte device id and a
//! 4-byte BCD value encoding the meter reading in hundredths of a cubic meter.
//! Field offsets vary between meter models and are described by
//! [`FrameLayout`].
//!
//! ## Usage
//!
//! ```rust
//! use mbus_meter::mbus::frame::{build_request, parse_frame, FrameLayout};
//!
//! let request = build_request(3);
//! assert_eq!(request, [0x68, 0x02, 0x02, 0x68, 0x5B, 0x03, 0x5E, 0x16]);
//!
//! let response = [
//!     0x68, 0x0B, 0x0B, 0x68, 0x08, 0x03, 0x72, 0x78, 0x56, 0x34, 0x12, 0x34, 0x12, 0x00,
//!     0x00, 0xD7, 0x16,
//! ];
//! let reading = parse_frame(&response, &FrameLayout::default()).unwrap();
//! assert_eq!(reading.address, 3);
//! assert_eq!(reading.value, 12.34);
//! assert_eq!(reading.device_id_hex(), "78563412");
//! ```

use crate::constants::{
    MBUS_BCD_VALUE_LENGTH, MBUS_CONTROL_MASK_REQ_UD2, MBUS_DEFAULT_ID_OFFSET,
    MBUS_DEFAULT_VALUE_OFFSET, MBUS_DEVICE_ID_LENGTH, MBUS_FRAME_HEADER_LENGTH,
    MBUS_FRAME_LONG_START, MBUS_FRAME_MIN_LENGTH, MBUS_FRAME_STOP, MBUS_FRAME_TRAILER_LENGTH,
    MBUS_REQUEST_PAYLOAD_LENGTH, MBUS_RESPONSE_ID_PAYLOAD, MBUS_RESPONSE_MIN_PAYLOAD,
    MBUS_VALUE_SCALE,
};
use crate::error::MBusError;
use log::{debug, warn};
use nom::bytes::complete::take;
use nom::number::complete::be_u8;
use nom::sequence::tuple;
use nom::IResult;
use serde::{Deserialize, Serialize};

/// Position of the device id and value fields inside a response payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameLayout {
    pub device_id_offset: usize,
    pub value_offset: usize,
}

impl Default for FrameLayout {
    fn default() -> Self {
        FrameLayout {
            device_id_offset: MBUS_DEFAULT_ID_OFFSET,
            value_offset: MBUS_DEFAULT_VALUE_OFFSET,
        }
    }
}

/// A validated response frame, decoded into a meter reading.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReading {
    pub control: u8,
    pub address: u8,
    pub data_identifier: u8,
    pub device_id: [u8; MBUS_DEVICE_ID_LENGTH],
    /// Reading in hundredths of a cubic meter, as carried on the wire
    pub raw_value: u32,
    /// Reading in cubic meters
    pub value: f64,
}

impl ParsedReading {
    /// Device id as upper-case hex, byte order as received.
    pub fn device_id_hex(&self) -> String {
        hex::encode_upper(self.device_id)
    }
}

/// Sum modulo 256 of the given bytes.
pub fn checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Builds the 8-byte REQ_UD2 request for a primary address.
pub fn build_request(address: u8) -> [u8; 8] {
    let length = MBUS_REQUEST_PAYLOAD_LENGTH;
    let payload = [MBUS_CONTROL_MASK_REQ_UD2, address];
    [
        MBUS_FRAME_LONG_START,
        length,
        length,
        MBUS_FRAME_LONG_START,
        payload[0],
        payload[1],
        checksum(&payload),
        MBUS_FRAME_STOP,
    ]
}

/// Wraps a payload into a long frame with header, checksum and stop byte.
pub fn pack_long_frame(payload: &[u8]) -> Vec<u8> {
    let length = payload.len().min(u8::MAX as usize) as u8;
    let payload = &payload[..length as usize];
    let mut frame = Vec::with_capacity(payload.len() + MBUS_FRAME_HEADER_LENGTH + MBUS_FRAME_TRAILER_LENGTH);
    frame.extend_from_slice(&[MBUS_FRAME_LONG_START, length, length, MBUS_FRAME_LONG_START]);
    frame.extend_from_slice(payload);
    frame.push(checksum(payload));
    frame.push(MBUS_FRAME_STOP);
    frame
}

/// Total frame length announced by a header whose length byte is `length`.
pub fn frame_length(length: u8) -> usize {
    MBUS_FRAME_HEADER_LENGTH + length as usize + MBUS_FRAME_TRAILER_LENGTH
}

fn long_frame_header(input: &[u8]) -> IResult<&[u8], (u8, u8, u8, u8)> {
    tuple((be_u8, be_u8, be_u8, be_u8))(input)
}

fn long_frame_body(input: &[u8], length: usize) -> IResult<&[u8], (&[u8], u8, u8)> {
    tuple((take(length), be_u8, be_u8))(input)
}

fn nom_error(err: nom::Err<nom::error::Error<&[u8]>>) -> MBusError {
    MBusError::FrameParseError(format!("{:?}", err.map(|e| e.code)))
}

/// Validates a received long frame and decodes the meter reading it carries.
///
/// Framing problems (markers, length symmetry, exact length, payload too
/// short) are reported as [`MBusError::FrameParseError`]; a checksum mismatch
/// on a well-formed frame is reported as [`MBusError::InvalidChecksum`].
pub fn parse_frame(bytes: &[u8], layout: &FrameLayout) -> Result<ParsedReading, MBusError> {
    if bytes.len() < MBUS_FRAME_MIN_LENGTH {
        return Err(MBusError::FrameParseError(format!(
            "frame too short: {} bytes",
            bytes.len()
        )));
    }

    let (rest, (start1, length1, length2, start2)) = long_frame_header(bytes).map_err(nom_error)?;
    if start1 != MBUS_FRAME_LONG_START || start2 != MBUS_FRAME_LONG_START || length1 != length2 {
        return Err(MBusError::FrameParseError(format!(
            "invalid long frame header {:02X} {:02X} {:02X} {:02X}",
            start1, length1, length2, start2
        )));
    }

    let expected_len = frame_length(length1);
    if bytes.len() != expected_len {
        return Err(MBusError::FrameParseError(format!(
            "length mismatch: header announces {} bytes, got {}",
            expected_len,
            bytes.len()
        )));
    }

    let (_, (payload, received, stop)) =
        long_frame_body(rest, length1 as usize).map_err(nom_error)?;
    if payload.len() < MBUS_RESPONSE_MIN_PAYLOAD {
        return Err(MBusError::FrameParseError(format!(
            "payload of {} bytes has no room for control, address and data identifier",
            payload.len()
        )));
    }

    let calculated = checksum(payload);
    if calculated != received {
        warn!(
            "checksum mismatch from address {}: calculated {:02X}, received {:02X}",
            payload[1], calculated, received
        );
        return Err(MBusError::InvalidChecksum {
            received,
            calculated,
        });
    }
    if stop != MBUS_FRAME_STOP {
        debug!("frame from address {} ends with {:02X} instead of stop byte", payload[1], stop);
    }

    let mut device_id = [0u8; MBUS_DEVICE_ID_LENGTH];
    if payload.len() >= MBUS_RESPONSE_ID_PAYLOAD {
        let id_field = layout
            .device_id_offset
            .checked_add(MBUS_DEVICE_ID_LENGTH)
            .and_then(|end| payload.get(layout.device_id_offset..end));
        if let Some(id) = id_field {
            device_id.copy_from_slice(id);
        }
    }

    // Short payloads carry a truncated (possibly empty) value field.
    let value_end = layout.value_offset.saturating_add(MBUS_BCD_VALUE_LENGTH).min(payload.len());
    let value_field = payload.get(layout.value_offset..value_end).unwrap_or(&[]);
    let raw_value = decode_bcd(value_field)?;

    Ok(ParsedReading {
        control: payload[0],
        address: payload[1],
        data_identifier: payload[2],
        device_id,
        raw_value,
        value: raw_value as f64 / MBUS_VALUE_SCALE,
    })
}

/// Decodes little-endian packed BCD: byte `i` contributes `(10*hi + lo) * 100^i`.
pub fn decode_bcd(bytes: &[u8]) -> Result<u32, MBusError> {
    let mut value = 0u32;
    let mut multiplier = 1u32;
    for &byte in bytes.iter().take(MBUS_BCD_VALUE_LENGTH) {
        let hi = (byte >> 4) & 0x0F;
        let lo = byte & 0x0F;
        if hi > 9 || lo > 9 {
            return Err(MBusError::InvalidBcd(byte));
        }
        value += (hi as u32 * 10 + lo as u32) * multiplier;
        multiplier = multiplier.saturating_mul(100);
    }
    Ok(value)
}

/// Encodes a value (in hundredths) as 4 little-endian BCD bytes.
///
/// Only the lowest 8 decimal digits fit; higher digits are dropped.
pub fn encode_bcd(mut hundredths: u32) -> [u8; MBUS_BCD_VALUE_LENGTH] {
    let mut out = [0u8; MBUS_BCD_VALUE_LENGTH];
    for byte in out.iter_mut() {
        let pair = (hundredths % 100) as u8;
        *byte = ((pair / 10) << 4) | (pair % 10);
        hundredths /= 100;
    }
    out
}

/// Builds a complete response frame for a reading, using the given layout.
///
/// Used by the mock transport and the tests to play the meter side. The
/// payload never exceeds 255 bytes; a field that does not fit is left out.
pub fn build_response(
    address: u8,
    device_id: [u8; MBUS_DEVICE_ID_LENGTH],
    hundredths: u32,
    layout: &FrameLayout,
) -> Vec<u8> {
    let id_end = layout.device_id_offset.saturating_add(MBUS_DEVICE_ID_LENGTH);
    let value_end = layout.value_offset.saturating_add(MBUS_BCD_VALUE_LENGTH);
    let size = id_end
        .max(value_end)
        .max(MBUS_RESPONSE_MIN_PAYLOAD)
        .min(u8::MAX as usize);
    let mut payload = vec![0u8; size];
    payload[0] = crate::constants::MBUS_CONTROL_MASK_RSP_UD;
    payload[1] = address;
    payload[2] = crate::constants::MBUS_CONTROL_INFO_RESP_VARIABLE;
    if let Some(slot) = payload.get_mut(layout.device_id_offset..id_end) {
        slot.copy_from_slice(&device_id);
    }
    if let Some(slot) = payload.get_mut(layout.value_offset..value_end) {
        slot.copy_from_slice(&encode_bcd(hundredths));
    }
    pack_long_frame(&payload)
}
