//! `$<payload>*<CC>\r\n` envelope.

use log::trace;

use crate::checksum::{compute_checksum, decode_checksum, encode_checksum};
use crate::errors::FrameError;

pub const FRAME_START: u8 = b'$';
pub const CHECKSUM_DELIMITER: u8 = b'*';
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Wrap a host-built payload into a wire frame, terminator included.
pub fn encode_frame(payload: &str) -> Vec<u8> {
    let checksum = encode_checksum(compute_checksum(payload.as_bytes()));
    let mut frame = Vec::with_capacity(payload.len() + 6);
    frame.push(FRAME_START);
    frame.extend_from_slice(payload.as_bytes());
    frame.push(CHECKSUM_DELIMITER);
    frame.extend_from_slice(checksum.as_bytes());
    frame.extend_from_slice(LINE_TERMINATOR);
    frame
}

/// Validate a raw line and return its payload.
///
/// The checksum is compared before the payload characters are inspected, so a
/// payload altered in transit reports [`FrameError::ChecksumMismatch`] even when
/// the corruption produced a delimiter or a non-ASCII byte.
pub fn decode_frame(raw: &[u8]) -> Result<String, FrameError> {
    let line = strip_terminator(raw);

    let body = match line.split_first() {
        Some((&FRAME_START, body)) => body,
        Some(_) => return Err(FrameError::Framing("line does not start with '$'".into())),
        None => return Err(FrameError::Framing("empty line".into())),
    };

    let star = body
        .iter()
        .rposition(|&b| b == CHECKSUM_DELIMITER)
        .ok_or_else(|| FrameError::Framing("missing '*' checksum delimiter".into()))?;
    let (payload, field) = (&body[..star], &body[star + 1..]);

    if field.len() != 2 {
        return Err(FrameError::Framing(format!(
            "checksum field has {} characters, expected 2",
            field.len()
        )));
    }
    let field = std::str::from_utf8(field)
        .map_err(|_| FrameError::MalformedChecksum(String::from_utf8_lossy(field).into_owned()))?;
    let received = decode_checksum(field)?;
    let computed = compute_checksum(payload);
    if computed != received {
        return Err(FrameError::ChecksumMismatch { computed, received });
    }

    if let Some(&bad) = payload
        .iter()
        .find(|&&b| !(b.is_ascii_graphic() || b == b' ') || b == FRAME_START || b == CHECKSUM_DELIMITER)
    {
        return Err(FrameError::Framing(format!(
            "payload contains invalid byte {bad:#04X}"
        )));
    }

    // Only printable ASCII remains, so this cannot fail.
    let payload = String::from_utf8_lossy(payload).into_owned();
    trace!("decoded frame payload={payload}");
    Ok(payload)
}

fn strip_terminator(raw: &[u8]) -> &[u8] {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\r' | b'\n') {
        end -= 1;
    }
    &raw[..end]
}
