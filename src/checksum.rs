//! One-byte XOR checksum used by the OpenAFE line protocol.
//!
//! The checksum travels as two uppercase hexadecimal characters after the `*`
//! delimiter. XOR only catches corruption that changes the folded value: a
//! single flipped bit is always detected, while two equal flips in different
//! bytes cancel out. That is a property of the device firmware and is kept as is.

use crate::errors::FrameError;

/// XOR-fold every byte of `payload`.
pub fn compute_checksum(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Render a checksum as two uppercase, zero-padded hex digits (`0x07` -> `"07"`).
pub fn encode_checksum(checksum: u8) -> String {
    format!("{checksum:02X}")
}

/// Parse the two-character checksum field, high nibble first.
///
/// Both upper and lower case hex digits are accepted.
pub fn decode_checksum(field: &str) -> Result<u8, FrameError> {
    let bytes = field.as_bytes();
    if bytes.len() != 2 {
        return Err(FrameError::MalformedChecksum(field.to_string()));
    }

    let high = nibble(bytes[0]).ok_or_else(|| FrameError::MalformedChecksum(field.to_string()))?;
    let low = nibble(bytes[1]).ok_or_else(|| FrameError::MalformedChecksum(field.to_string()))?;
    Ok((high << 4) | low)
}

fn nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'A'..=b'F' => Some(c - b'A' + 10),
        b'a'..=b'f' => Some(c - b'a' + 10),
        _ => None,
    }
}
