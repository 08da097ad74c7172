//! MELSEC-compatible 3E frame codec (binary mode).
//!
//! Only the batch-read command is implemented: the collection pipeline
//! never writes to the PLC.

use super::{PlcError, PlcResult};

/// 3E frame subheader of a request.
const REQ_SUBHEADER: [u8; 2] = [0x50, 0x00];
/// 3E frame subheader of a response.
const RESP_SUBHEADER: [u8; 2] = [0xD0, 0x00];
/// Batch read command, little-endian on the wire.
const CMD_BATCH_READ: u16 = 0x0401;
const SUBCMD_WORD: u16 = 0x0000;
const SUBCMD_BIT: u16 = 0x0001;
/// CPU monitoring timer in 250 ms units.
const MONITORING_TIMER: u16 = 4;

/// Response header up to and including the data-length field.
pub(crate) const RESP_HEADER_LEN: usize = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Device {
    pub code: u8,
    pub number: u32,
}

struct DeviceKind {
    prefix: &'static str,
    code: u8,
    hex_numbered: bool,
}

// Longest prefixes first so "SD210" never parses as S + "D210".
const DEVICE_KINDS: &[DeviceKind] = &[
    DeviceKind { prefix: "SD", code: 0xA9, hex_numbered: false },
    DeviceKind { prefix: "SM", code: 0x91, hex_numbered: false },
    DeviceKind { prefix: "ZR", code: 0xB0, hex_numbered: true },
    DeviceKind { prefix: "D", code: 0xA8, hex_numbered: false },
    DeviceKind { prefix: "W", code: 0xB4, hex_numbered: true },
    DeviceKind { prefix: "R", code: 0xAF, hex_numbered: false },
    DeviceKind { prefix: "M", code: 0x90, hex_numbered: false },
    DeviceKind { prefix: "L", code: 0x92, hex_numbered: false },
    DeviceKind { prefix: "B", code: 0xA0, hex_numbered: true },
    DeviceKind { prefix: "X", code: 0x9C, hex_numbered: true },
    DeviceKind { prefix: "Y", code: 0x9D, hex_numbered: true },
];

/// Parses a device name like `D100`, `SD210`, `M600` or `X1F` into its
/// binary device code and number.
pub(crate) fn parse_device(name: &str) -> PlcResult<Device> {
    let kind = DEVICE_KINDS
        .iter()
        .find(|k| name.starts_with(k.prefix))
        .ok_or_else(|| PlcError::Protocol(format!("unsupported device: {}", name)))?;
    let digits = &name[kind.prefix.len()..];
    if digits.is_empty() {
        return Err(PlcError::Protocol(format!("invalid device: {}", name)));
    }
    let radix = if kind.hex_numbered { 16 } else { 10 };
    let number = u32::from_str_radix(digits, radix)
        .map_err(|_| PlcError::Protocol(format!("invalid device number: {}", name)))?;
    if number > 0x00FF_FFFF {
        return Err(PlcError::Protocol(format!("device number too large: {}", name)));
    }
    Ok(Device {
        code: kind.code,
        number,
    })
}

/// Builds a binary 3E batch-read request frame.
pub(crate) fn build_batch_read(device: Device, points: u16, bits: bool) -> Vec<u8> {
    let subcmd = if bits { SUBCMD_BIT } else { SUBCMD_WORD };
    // timer + command + subcommand + device number + device code + points
    let data_len: u16 = 2 + 2 + 2 + 3 + 1 + 2;
    let mut frame = Vec::with_capacity(RESP_HEADER_LEN + data_len as usize);
    frame.extend_from_slice(&REQ_SUBHEADER);
    frame.push(0x00); // network
    frame.push(0xFF); // PC
    frame.extend_from_slice(&0x03FFu16.to_le_bytes()); // destination module
    frame.push(0x00); // destination station
    frame.extend_from_slice(&data_len.to_le_bytes());
    frame.extend_from_slice(&MONITORING_TIMER.to_le_bytes());
    frame.extend_from_slice(&CMD_BATCH_READ.to_le_bytes());
    frame.extend_from_slice(&subcmd.to_le_bytes());
    frame.extend_from_slice(&device.number.to_le_bytes()[..3]);
    frame.push(device.code);
    frame.extend_from_slice(&points.to_le_bytes());
    frame
}

/// Validates a response header and returns the remaining frame length
/// (end code + payload).
pub(crate) fn parse_response_header(header: &[u8]) -> PlcResult<usize> {
    if header.len() < RESP_HEADER_LEN || header[..2] != RESP_SUBHEADER {
        return Err(PlcError::Protocol("malformed response header".to_owned()));
    }
    let len = u16::from_le_bytes([header[7], header[8]]) as usize;
    if len < 2 {
        return Err(PlcError::Protocol("short response".to_owned()));
    }
    Ok(len)
}

/// Checks the end code and returns the data payload.
pub(crate) fn parse_response_body(body: &[u8]) -> PlcResult<&[u8]> {
    if body.len() < 2 {
        return Err(PlcError::Protocol("short response body".to_owned()));
    }
    let end_code = u16::from_le_bytes([body[0], body[1]]);
    if end_code != 0 {
        return Err(PlcError::Protocol(format!(
            "device error code 0x{:04x}",
            end_code
        )));
    }
    Ok(&body[2..])
}

pub(crate) fn words_from_payload(payload: &[u8], points: u16) -> PlcResult<Vec<u16>> {
    if payload.len() != usize::from(points) * 2 {
        return Err(PlcError::Protocol(format!(
            "word payload length mismatch: {} for {} point(s)",
            payload.len(),
            points
        )));
    }
    Ok(payload
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect())
}

/// Bit responses pack two values per byte, high nibble first.
pub(crate) fn bits_from_payload(payload: &[u8], points: u16) -> PlcResult<Vec<bool>> {
    let points = usize::from(points);
    if payload.len() != (points + 1) / 2 {
        return Err(PlcError::Protocol(format!(
            "bit payload length mismatch: {} for {} point(s)",
            payload.len(),
            points
        )));
    }
    let mut bits = Vec::with_capacity(points);
    for byte in payload {
        bits.push(byte >> 4 != 0);
        bits.push(byte & 0x0F != 0);
    }
    bits.truncate(points);
    Ok(bits)
}

/// Combines consecutive word pairs into signed 32-bit values,
/// little-endian: `[0x1234, 0x5678]` -> `0x5678_1234`.
#[allow(clippy::cast_possible_wrap)]
pub(crate) fn dwords_from_words(words: &[u16]) -> Vec<i32> {
    words
        .chunks_exact(2)
        .map(|pair| (u32::from(pair[1]) << 16 | u32::from(pair[0])) as i32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_word_and_bit_devices() {
        assert_eq!(
            parse_device("D100").unwrap(),
            Device { code: 0xA8, number: 100 }
        );
        assert_eq!(
            parse_device("SD210").unwrap(),
            Device { code: 0xA9, number: 210 }
        );
        assert_eq!(
            parse_device("M600").unwrap(),
            Device { code: 0x90, number: 600 }
        );
        // hex numbering
        assert_eq!(
            parse_device("X10").unwrap(),
            Device { code: 0x9C, number: 0x10 }
        );
    }

    #[test]
    fn rejects_bad_devices() {
        assert!(parse_device("Q1").is_err());
        assert!(parse_device("D").is_err());
        assert!(parse_device("M12X").is_err());
    }

    #[test]
    fn batch_read_frame_layout() {
        let frame = build_batch_read(parse_device("D100").unwrap(), 3, false);
        assert_eq!(
            frame,
            vec![
                0x50, 0x00, // subheader
                0x00, 0xFF, 0xFF, 0x03, 0x00, // route
                0x0C, 0x00, // data length
                0x04, 0x00, // monitoring timer
                0x01, 0x04, // batch read
                0x00, 0x00, // word units
                0x64, 0x00, 0x00, // device number 100
                0xA8, // D
                0x03, 0x00, // points
            ]
        );
    }

    #[test]
    fn response_roundtrip() {
        let header = [0xD0, 0x00, 0x00, 0xFF, 0xFF, 0x03, 0x00, 0x06, 0x00];
        let len = parse_response_header(&header).unwrap();
        assert_eq!(len, 6);
        let body = [0x00, 0x00, 0x34, 0x12, 0x78, 0x56];
        let payload = parse_response_body(&body).unwrap();
        assert_eq!(words_from_payload(payload, 2).unwrap(), vec![0x1234, 0x5678]);
    }

    #[test]
    fn device_error_code_is_protocol_error() {
        let body = [0x51, 0xC0];
        match parse_response_body(&body) {
            Err(PlcError::Protocol(msg)) => assert!(msg.contains("c051")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn bit_unpacking() {
        // 5 points in 3 bytes: 1,0 | 0,1 | 1,_
        let bits = bits_from_payload(&[0x10, 0x01, 0x10], 5).unwrap();
        assert_eq!(bits, vec![true, false, false, true, true]);
    }

    #[test]
    fn dword_reconstruction() {
        assert_eq!(dwords_from_words(&[0x1234, 0x5678]), vec![0x5678_1234]);
        // negative value
        assert_eq!(dwords_from_words(&[0xFFFF, 0xFFFF]), vec![-1]);
    }
}
