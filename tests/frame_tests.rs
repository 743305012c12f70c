//! Unit tests for the `frame.rs` module, which includes building requests and
//! validating and decoding meter responses.

use mbus_meter::mbus::frame::{
    build_request, build_response, checksum, decode_bcd, encode_bcd, pack_long_frame, parse_frame, FrameLayout,
};
use mbus_meter::MBusError;
use proptest::prelude::*;

const DEVICE_ID: [u8; 4] = [0x78, 0x56, 0x34, 0x12];

fn reading_frame(address: u8, hundredths: u32) -> Vec<u8> {
    build_response(address, DEVICE_ID, hundredths, &FrameLayout::default())
}

/// Tests that a REQ_UD2 request has the fixed layout and checksum.
#[test]
fn test_build_request() {
    assert_eq!(build_request(1), [0x68, 0x02, 0x02, 0x68, 0x5B, 0x01, 0x5C, 0x16]);
    assert_eq!(build_request(0xA5)[6], 0x00);
}

/// Tests that a valid response decodes into address, device id and value.
#[test]
fn test_parse_valid_response() {
    let frame = reading_frame(3, 1234);
    let reading = parse_frame(&frame, &FrameLayout::default()).unwrap();
    assert_eq!(reading.control, 0x08);
    assert_eq!(reading.address, 3);
    assert_eq!(reading.data_identifier, 0x72);
    assert_eq!(reading.device_id_hex(), "78563412");
    assert_eq!(reading.raw_value, 1234);
    assert_eq!(reading.value, 12.34);
}

/// Tests that the BCD value 12.34 survives encoding and decoding.
#[test]
fn test_bcd_value_round_trip() {
    let bytes = encode_bcd(1234);
    assert_eq!(bytes, [0x34, 0x12, 0x00, 0x00]);
    assert_eq!(decode_bcd(&bytes).unwrap() as f64 / 100.0, 12.34);
}

/// Tests that a frame shorter than the minimum is a framing error.
#[test]
fn test_reject_short_input() {
    let err = parse_frame(&[0x68, 0x01, 0x01, 0x68, 0x08, 0x08], &FrameLayout::default()).unwrap_err();
    assert!(matches!(err, MBusError::FrameParseError(_)));
}

/// Tests that asymmetric length bytes and a wrong second start byte are framing errors.
#[test]
fn test_reject_bad_header() {
    let mut frame = reading_frame(1, 100);
    frame[2] = frame[2].wrapping_add(1);
    assert!(matches!(
        parse_frame(&frame, &FrameLayout::default()),
        Err(MBusError::FrameParseError(_))
    ));

    let mut frame = reading_frame(1, 100);
    frame[3] = 0x69;
    assert!(matches!(
        parse_frame(&frame, &FrameLayout::default()),
        Err(MBusError::FrameParseError(_))
    ));
}

/// Tests that a frame whose size disagrees with its length byte is a framing error.
#[test]
fn test_reject_length_mismatch() {
    let mut frame = reading_frame(1, 100);
    frame.push(0x00);
    assert!(matches!(
        parse_frame(&frame, &FrameLayout::default()),
        Err(MBusError::FrameParseError(_))
    ));
    let truncated = &reading_frame(1, 100)[..10];
    assert!(matches!(
        parse_frame(truncated, &FrameLayout::default()),
        Err(MBusError::FrameParseError(_))
    ));
}

/// Tests that a payload without control, address and data identifier is rejected.
#[test]
fn test_reject_payload_without_header_fields() {
    let frame = pack_long_frame(&[0x08, 0x01]);
    assert_eq!(frame.len(), 8);
    assert!(matches!(
        parse_frame(&frame, &FrameLayout::default()),
        Err(MBusError::FrameParseError(_))
    ));
}

/// Tests that a corrupted checksum byte is reported as a checksum error.
#[test]
fn test_reject_bad_checksum() {
    let mut frame = reading_frame(2, 5000);
    let cs = frame.len() - 2;
    frame[cs] = frame[cs].wrapping_add(1);
    match parse_frame(&frame, &FrameLayout::default()) {
        Err(MBusError::InvalidChecksum { received, calculated }) => {
            assert_eq!(received, calculated.wrapping_add(1));
        }
        other => panic!("expected checksum error, got {other:?}"),
    }
}

/// Tests that a BCD nibble above 9 is rejected.
#[test]
fn test_reject_invalid_bcd() {
    let mut payload = reading_frame(2, 0)[4..15].to_vec();
    payload[7] = 0x1A;
    let frame = pack_long_frame(&payload);
    assert!(matches!(
        parse_frame(&frame, &FrameLayout::default()),
        Err(MBusError::InvalidBcd(0x1A))
    ));
}

/// Tests that a custom layout reads the value from a different offset.
#[test]
fn test_custom_layout() {
    let layout = FrameLayout {
        device_id_offset: 3,
        value_offset: 5,
    };
    let frame = build_response(4, [0x11, 0x22, 0x33, 0x44], 250, &layout);
    let reading = parse_frame(&frame, &layout).unwrap();
    assert_eq!(reading.value, 2.5);
}

proptest! {
    /// Tests that the checksum is the payload sum modulo 256.
    #[test]
    fn prop_checksum_is_sum_mod_256(payload in proptest::collection::vec(any::<u8>(), 0..300)) {
        let expected = (payload.iter().map(|&b| b as u32).sum::<u32>() % 256) as u8;
        prop_assert_eq!(checksum(&payload), expected);
        prop_assert_eq!(checksum(&payload), checksum(&payload));
    }

    /// Tests that changing any single payload byte of a valid frame breaks its checksum.
    #[test]
    fn prop_single_byte_mutation_fails_checksum(
        hundredths in 0u32..100_000_000,
        index in 0usize..11,
        delta in 1u8..=255,
    ) {
        let mut frame = reading_frame(5, hundredths);
        frame[4 + index] = frame[4 + index].wrapping_add(delta);
        let matches_checksum = matches!(
            parse_frame(&frame, &FrameLayout::default()),
            Err(MBusError::InvalidChecksum { .. })
        );
        prop_assert!(matches_checksum);
    }

    /// Tests that every value below 10^8 hundredths survives the BCD codec.
    #[test]
    fn prop_bcd_round_trip(hundredths in 0u32..100_000_000) {
        prop_assert_eq!(decode_bcd(&encode_bcd(hundredths)).unwrap(), hundredths);
    }
}
