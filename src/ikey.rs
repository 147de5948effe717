//! Internal key and value-tag format shared by the write and read paths.
//!
//! An internal key is the user key followed by an 8-byte trailer packing the
//! sequence number and the entry's type tag:
//!
//! ```text
//! [user_key][fixed64 (sequence << 8) | tag]
//! ```
//!
//! Internal values carry the same tag as a one-byte prefix, so the read path
//! classifies an entry with a single byte test. Tag `1` is reserved for
//! vTable index entries and is deliberately not a valid inline-value tag:
//!
//! | tag | meaning                              |
//! |-----|--------------------------------------|
//! | 0   | deletion (no value bytes follow)     |
//! | 1   | vTable index entry                   |
//! | 2   | inline value                         |

use crate::encoding::{get_fixed64, put_fixed64};
use crate::vtable::VTABLE_INDEX_TAG;

/// Trailer bytes appended to a user key.
pub const INTERNAL_KEY_TRAILER_SIZE: usize = 8;

/// Tag of a deletion entry.
pub const TAG_DELETION: u8 = 0;

/// Tag of a value separated into a vTable (equals the SST-side index tag).
pub const TAG_VTABLE_INDEX: u8 = VTABLE_INDEX_TAG;

/// Tag of an inline value.
pub const TAG_VALUE: u8 = 2;

/// A decoded internal key, borrowing from the encoded bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    /// The user key.
    pub user_key: &'a [u8],
    /// Sequence number of the mutation.
    pub sequence: u64,
    /// Entry type: [`TAG_DELETION`] or [`TAG_VALUE`].
    pub tag: u8,
}

/// Encode `user_key` with its trailer.
pub fn encode_internal_key(user_key: &[u8], sequence: u64, tag: u8) -> Vec<u8> {
    let mut key = Vec::with_capacity(user_key.len() + INTERNAL_KEY_TRAILER_SIZE);
    key.extend_from_slice(user_key);
    put_fixed64(&mut key, (sequence << 8) | u64::from(tag));
    key
}

/// Split an internal key into its parts.
///
/// Returns `None` if the key is shorter than its trailer or carries a tag
/// no writer produces.
pub fn parse_internal_key(internal_key: &[u8]) -> Option<ParsedInternalKey<'_>> {
    if internal_key.len() < INTERNAL_KEY_TRAILER_SIZE {
        return None;
    }
    let (user_key, mut trailer) = internal_key.split_at(internal_key.len() - INTERNAL_KEY_TRAILER_SIZE);
    let packed = get_fixed64(&mut trailer).ok()?;
    let tag = (packed & 0xff) as u8;
    if tag != TAG_DELETION && tag != TAG_VALUE {
        return None;
    }
    Some(ParsedInternalKey {
        user_key,
        sequence: packed >> 8,
        tag,
    })
}

/// The user-key portion of an internal key.
pub fn user_key(internal_key: &[u8]) -> &[u8] {
    &internal_key[..internal_key.len().saturating_sub(INTERNAL_KEY_TRAILER_SIZE)]
}
