//! Deterministic, zero-dependency binary encoding for on-disk persistence.
//!
//! Every on-disk structure in vellumdb (vTable records, handles, index
//! entries, the vTable manager manifest, SSTable blocks, fields values) is
//! built from a small family of primitives defined here. Because vellumdb
//! owns this format, the on-disk representation **never** changes due to a
//! dependency upgrade.
//!
//! # Wire format
//!
//! | Primitive            | Encoding                                    |
//! |----------------------|---------------------------------------------|
//! | `fixed32`            | 4 bytes, little-endian                      |
//! | `fixed64`            | 8 bytes, little-endian                      |
//! | `varint64`           | LEB128, 1–10 bytes, low 7 bits first        |
//! | length-prefixed blob | `[varint64 len][len bytes]`                 |
//!
//! Decoders operate on a `&mut &[u8]` cursor: each successful call consumes
//! the bytes it read, so composite structures decode by chaining calls over
//! one shrinking slice.
//!
//! # Safety limits
//!
//! Length-prefixed reads are bounded by [`MAX_BLOB_LEN`] so a corrupted
//! length field cannot trigger an allocation bomb.
//!
//! # Zero-panic guarantee
//!
//! No function in this module uses `unwrap()`, `expect()`, or any other
//! panicking path. All errors are propagated via [`EncodingError`].

#[cfg(test)]
mod tests;

use thiserror::Error;

/// Maximum byte length accepted for a single length-prefixed blob during
/// decoding (256 MiB).
///
/// Any decoded length field exceeding this value is rejected immediately,
/// preventing allocation bombs from corrupted or malicious data.
pub const MAX_BLOB_LEN: u64 = 256 * 1024 * 1024;

/// Longest possible varint64 encoding in bytes.
pub const MAX_VARINT64_LEN: usize = 10;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors produced while decoding wire-format primitives.
#[derive(Debug, Error)]
pub enum EncodingError {
    /// The buffer ran out of bytes before decoding completed.
    #[error("unexpected end of buffer (need {needed} bytes, have {available})")]
    UnexpectedEof {
        /// Bytes required to continue decoding.
        needed: usize,
        /// Bytes actually remaining.
        available: usize,
    },

    /// A varint64 ran past 10 bytes without terminating.
    #[error("malformed varint64 (no terminating byte within {MAX_VARINT64_LEN} bytes)")]
    VarintOverflow,

    /// A decoded length exceeded [`MAX_BLOB_LEN`].
    #[error("blob length {0} exceeds MAX_BLOB_LEN ({MAX_BLOB_LEN})")]
    LengthOverflow(u64),
}

// ------------------------------------------------------------------------------------------------
// Internal helpers
// ------------------------------------------------------------------------------------------------

/// Verify that `buf` has at least `needed` bytes, returning
/// [`EncodingError::UnexpectedEof`] if not.
#[inline]
fn require(buf: &[u8], needed: usize) -> Result<(), EncodingError> {
    if buf.len() < needed {
        Err(EncodingError::UnexpectedEof {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// Fixed-width integers
// ------------------------------------------------------------------------------------------------

/// Append a `u32` as 4 little-endian bytes.
#[inline]
pub fn put_fixed32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Consume 4 bytes from the cursor and return them as a little-endian `u32`.
#[inline]
pub fn get_fixed32(input: &mut &[u8]) -> Result<u32, EncodingError> {
    require(input, 4)?;
    let (head, rest) = input.split_at(4);
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(head);
    *input = rest;
    Ok(u32::from_le_bytes(bytes))
}

/// Append a `u64` as 8 little-endian bytes.
#[inline]
pub fn put_fixed64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Consume 8 bytes from the cursor and return them as a little-endian `u64`.
#[inline]
pub fn get_fixed64(input: &mut &[u8]) -> Result<u64, EncodingError> {
    require(input, 8)?;
    let (head, rest) = input.split_at(8);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(head);
    *input = rest;
    Ok(u64::from_le_bytes(bytes))
}

// ------------------------------------------------------------------------------------------------
// Varint64 (LEB128)
// ------------------------------------------------------------------------------------------------

/// Append a `u64` in LEB128 form: 7 payload bits per byte, low bits first,
/// high bit set on every byte except the last.
pub fn put_varint64(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Consume one varint64 from the cursor.
pub fn get_varint64(input: &mut &[u8]) -> Result<u64, EncodingError> {
    let mut result: u64 = 0;
    for (i, &byte) in input.iter().take(MAX_VARINT64_LEN).enumerate() {
        let payload = u64::from(byte & 0x7f);
        result |= payload << (7 * i);
        if byte & 0x80 == 0 {
            *input = &input[i + 1..];
            return Ok(result);
        }
    }
    if input.len() < MAX_VARINT64_LEN {
        Err(EncodingError::UnexpectedEof {
            needed: input.len() + 1,
            available: input.len(),
        })
    } else {
        Err(EncodingError::VarintOverflow)
    }
}

/// Number of bytes [`put_varint64`] emits for `value`.
pub fn varint64_len(value: u64) -> usize {
    let mut len = 1;
    let mut v = value;
    while v >= 0x80 {
        v >>= 7;
        len += 1;
    }
    len
}

// ------------------------------------------------------------------------------------------------
// Length-prefixed blobs
// ------------------------------------------------------------------------------------------------

/// Append `[varint64 len][bytes]`.
pub fn put_length_prefixed_slice(buf: &mut Vec<u8>, data: &[u8]) {
    put_varint64(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

/// Consume `[varint64 len][bytes]` from the cursor and return the bytes.
///
/// The decoded length is bounded by [`MAX_BLOB_LEN`].
pub fn get_length_prefixed_slice<'a>(input: &mut &'a [u8]) -> Result<&'a [u8], EncodingError> {
    let len = get_varint64(input)?;
    if len > MAX_BLOB_LEN {
        return Err(EncodingError::LengthOverflow(len));
    }
    let len = len as usize;
    require(input, len)?;
    let (head, rest) = input.split_at(len);
    *input = rest;
    Ok(head)
}
