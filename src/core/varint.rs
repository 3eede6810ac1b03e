//! Unsigned LEB128 integers
//!
//! Every length prefix in the container and store formats is a varint: seven
//! payload bits per byte, high bit set on every byte except the last.

use crate::error::{Result, TmcoError};

/// Longest encoding of a `u64` (ceil(64 / 7))
pub const MAX_LEN: usize = 10;

/// Append the encoding of `value` to `out`
pub fn encode_into(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Encode `value` into a fresh buffer
pub fn encode(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_len(value));
    encode_into(value, &mut out);
    out
}

/// Number of bytes `encode(value)` produces
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}

/// Decode a varint at the start of `bytes`
///
/// Returns the value and the number of bytes consumed. Running off the end of
/// the buffer or overflowing 64 bits is reported as a malformed container,
/// since container decoding is where callers hit it first.
pub fn decode(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0u32;

    for (i, &byte) in bytes.iter().enumerate().take(MAX_LEN) {
        let payload = (byte & 0x7f) as u64;
        if shift == 63 && payload > 1 {
            return Err(TmcoError::MalformedContainer(
                "varint overflows 64 bits".to_string(),
            ));
        }
        value |= payload << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }

    if bytes.len() >= MAX_LEN {
        Err(TmcoError::MalformedContainer(
            "varint longer than 10 bytes".to_string(),
        ))
    } else {
        Err(TmcoError::MalformedContainer(
            "varint runs past end of buffer".to_string(),
        ))
    }
}

/// Decode a varint length prefix followed by that many bytes
///
/// Returns the framed slice and the total number of bytes consumed.
pub fn decode_prefixed(bytes: &[u8]) -> Result<(&[u8], usize)> {
    let (len, header) = decode(bytes)?;
    let rest = &bytes[header..];
    let len = usize::try_from(len).map_err(|_| {
        TmcoError::MalformedContainer(format!("length prefix {} does not fit in memory", len))
    })?;

    if rest.len() < len {
        return Err(TmcoError::MalformedContainer(format!(
            "field of {} bytes runs past end of buffer ({} bytes left)",
            len,
            rest.len()
        )));
    }

    Ok((&rest[..len], header + len))
}

/// Append a varint length prefix and `data` to `out`
pub fn encode_prefixed_into(data: &[u8], out: &mut Vec<u8>) {
    encode_into(data.len() as u64, out);
    out.extend_from_slice(data);
}
