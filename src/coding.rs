//! Byte Codec
//!
//! Fixed-width little-endian integers, varints and length-prefixed slices.
//! These layouts are persisted (log records, write batches, memtable entries),
//! so every function here is byte-for-byte stable.
//!
//! ## Varint Format
//! ```text
//! 7 payload bits per byte, least significant group first,
//! high bit set on every byte except the last.
//!
//!   300 = 0b1_0010_1100  ->  [0xAC, 0x02]
//! ```

use bytes::BufMut;

/// Longest encoding of a varint32
pub const MAX_VARINT32_LEN: usize = 5;

/// Longest encoding of a varint64
pub const MAX_VARINT64_LEN: usize = 10;

// =============================================================================
// Fixed-width Integers
// =============================================================================

pub fn put_fixed32(dst: &mut impl BufMut, value: u32) {
    dst.put_u32_le(value);
}

pub fn put_fixed64(dst: &mut impl BufMut, value: u64) {
    dst.put_u64_le(value);
}

/// Decode a little-endian u32 from the first 4 bytes of `src`.
///
/// Panics if `src` is shorter than 4 bytes.
pub fn decode_fixed32(src: &[u8]) -> u32 {
    u32::from_le_bytes([src[0], src[1], src[2], src[3]])
}

/// Decode a little-endian u64 from the first 8 bytes of `src`.
///
/// Panics if `src` is shorter than 8 bytes.
pub fn decode_fixed64(src: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&src[..8]);
    u64::from_le_bytes(buf)
}

// =============================================================================
// Varints
// =============================================================================

/// Number of bytes the varint encoding of `value` occupies
pub fn varint_length(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Encode `value` at the start of `dst`, returning the bytes written.
///
/// Panics if `dst` is too short; size it with [`varint_length`].
pub fn encode_varint32(dst: &mut [u8], value: u32) -> usize {
    encode_varint64(dst, value as u64)
}

pub fn encode_varint64(dst: &mut [u8], mut value: u64) -> usize {
    let mut i = 0;
    while value >= 0x80 {
        dst[i] = (value as u8) | 0x80;
        value >>= 7;
        i += 1;
    }
    dst[i] = value as u8;
    i + 1
}

pub fn put_varint32(dst: &mut impl BufMut, value: u32) {
    put_varint64(dst, value as u64);
}

pub fn put_varint64(dst: &mut impl BufMut, value: u64) {
    let mut buf = [0u8; MAX_VARINT64_LEN];
    let len = encode_varint64(&mut buf, value);
    dst.put_slice(&buf[..len]);
}

/// Parse a varint32 from the front of `input`, advancing it past the bytes read.
///
/// Returns `None` (leaving `input` untouched) on truncation or if the value does
/// not fit in 32 bits.
pub fn get_varint32(input: &mut &[u8]) -> Option<u32> {
    let (value, len) = parse_varint(input, 32)?;
    *input = &input[len..];
    Some(value as u32)
}

pub fn get_varint64(input: &mut &[u8]) -> Option<u64> {
    let (value, len) = parse_varint(input, 64)?;
    *input = &input[len..];
    Some(value)
}

fn parse_varint(input: &[u8], bits: u32) -> Option<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in input.iter().enumerate() {
        if shift >= bits {
            return None;
        }
        let group = (byte & 0x7f) as u64;
        if shift + 7 > bits && group >> (bits - shift) != 0 {
            return None;
        }
        result |= group << shift;
        if byte & 0x80 == 0 {
            return Some((result, i + 1));
        }
        shift += 7;
    }
    None
}

// =============================================================================
// Length-prefixed Slices
// =============================================================================

pub fn put_length_prefixed_slice(dst: &mut impl BufMut, value: &[u8]) {
    put_varint32(dst, value.len() as u32);
    dst.put_slice(value);
}

/// Parse `varint32(len) | bytes[len]` from the front of `input`.
pub fn get_length_prefixed_slice<'a>(input: &mut &'a [u8]) -> Option<&'a [u8]> {
    let mut cursor = *input;
    let len = get_varint32(&mut cursor)? as usize;
    if cursor.len() < len {
        return None;
    }
    let (value, rest) = cursor.split_at(len);
    *input = rest;
    Some(value)
}
