//! EBML wire primitives: variable-length ids and sizes, uint payloads.
//!
//! Decoders work on a possibly-partial byte tail and distinguish "feed me
//! more bytes" from "these bytes can never be valid", which is what the
//! resumable parser needs.

/// Largest size value a known-size vint can carry (the all-ones pattern of
/// every length is reserved for "unknown").
pub const MAX_KNOWN_SIZE: u64 = (1 << 56) - 2;

/// The 8-byte "size not known yet" marker used for streamed containers.
pub const UNKNOWN_SIZE_MARKER: [u8; 8] = [0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];

/// Declared payload size of an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementSize {
    Known(u64),
    Unknown,
}

/// Outcome of decoding from a partial buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoded<T> {
    /// A complete value and the number of bytes it occupied.
    Complete(T, usize),
    /// The buffer ends mid-field; retry with more bytes.
    NeedMoreData,
    /// No continuation of these bytes can be valid.
    Invalid,
}

/// Decode an element id. Ids keep their length-marker bits (0xA3 stays
/// 0xA3, 0x1A45DFA3 stays 0x1A45DFA3) and are at most 4 bytes.
pub fn decode_id(data: &[u8]) -> Decoded<u32> {
    let Some(&first) = data.first() else {
        return Decoded::NeedMoreData;
    };

    let length = match first {
        b if b & 0x80 != 0 => 1,
        b if b & 0x40 != 0 => 2,
        b if b & 0x20 != 0 => 3,
        b if b & 0x10 != 0 => 4,
        _ => return Decoded::Invalid,
    };

    if data.len() < length {
        return Decoded::NeedMoreData;
    }

    let mut id = 0u32;
    for &byte in &data[..length] {
        id = (id << 8) | byte as u32;
    }
    Decoded::Complete(id, length)
}

/// Decode an element size vint (1-8 bytes, marker bits stripped). The
/// all-ones value of any length is the reserved "unknown size" pattern.
pub fn decode_size(data: &[u8]) -> Decoded<ElementSize> {
    let Some(&first) = data.first() else {
        return Decoded::NeedMoreData;
    };

    if first == 0 {
        // Length 9 or more; sizes stop at 8 bytes.
        return Decoded::Invalid;
    }
    let length = first.leading_zeros() as usize + 1;

    if data.len() < length {
        return Decoded::NeedMoreData;
    }

    let mut value = (first & (0xFF >> length)) as u64;
    for &byte in &data[1..length] {
        value = (value << 8) | byte as u64;
    }

    let all_ones = (1u64 << (7 * length)) - 1;
    if value == all_ones {
        Decoded::Complete(ElementSize::Unknown, length)
    } else {
        Decoded::Complete(ElementSize::Known(value), length)
    }
}

/// Decode a big-endian unsigned integer payload (0-8 bytes; empty is 0).
pub fn decode_uint(payload: &[u8]) -> u64 {
    let mut value = 0u64;
    for &byte in payload {
        value = (value << 8) | byte as u64;
    }
    value
}

/// Append an element id. Ids already include their marker bits, so the
/// raw big-endian bytes go out as-is.
pub fn encode_id(buf: &mut Vec<u8>, id: u32) {
    let length = match id {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        0x1_0000..=0xFF_FFFF => 3,
        _ => 4,
    };
    for shift in (0..length).rev() {
        buf.push((id >> (shift * 8)) as u8);
    }
}

/// Append a size vint in its minimal length.
pub fn encode_size(buf: &mut Vec<u8>, size: u64) {
    debug_assert!(size <= MAX_KNOWN_SIZE);
    for length in 1..=8usize {
        // The all-ones value of each length is reserved.
        let max = (1u64 << (7 * length)) - 2;
        if size <= max {
            buf.push((0x80 >> (length - 1)) as u8 | (size >> ((length - 1) * 8)) as u8);
            for shift in (0..length - 1).rev() {
                buf.push((size >> (shift * 8)) as u8);
            }
            return;
        }
    }
}

/// Encode a size in the fixed 8-byte vint form used to backpatch
/// placeholders: the patch must not change the field's width.
pub fn encode_size_fixed8(size: u64) -> [u8; 8] {
    debug_assert!(size <= MAX_KNOWN_SIZE);
    [
        0x01,
        (size >> 48) as u8,
        (size >> 40) as u8,
        (size >> 32) as u8,
        (size >> 24) as u8,
        (size >> 16) as u8,
        (size >> 8) as u8,
        size as u8,
    ]
}

/// Minimal big-endian payload bytes for an unsigned integer element.
pub fn uint_payload(value: u64) -> Vec<u8> {
    let length = if value == 0 {
        1
    } else {
        (64 - value.leading_zeros()).div_ceil(8) as usize
    };
    let mut bytes = Vec::with_capacity(length);
    for shift in (0..length).rev() {
        bytes.push((value >> (shift * 8)) as u8);
    }
    bytes
}
