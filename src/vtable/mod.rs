//! # vTable Component — key-value separation
//!
//! Large values are not stored inside SSTables. At flush time they are
//! written to an append-only side file, a **vTable**, and the SSTable keeps
//! only a small index entry pointing into it. This module owns that whole
//! lifecycle:
//!
//! | Sub-module  | Responsibility                                          |
//! |-------------|---------------------------------------------------------|
//! | [`format`]  | Record framing, handles, and SST-side index entries     |
//! | [`builder`] | Sequential construction of one vTable file              |
//! | [`reader`]  | Random-access resolution of a handle back to a record   |
//! | [`manager`] | Per-file liveness, refcounts, background GC, persistence|
//!
//! ## On-disk formats
//!
//! A vTable file is a bare sequence of framed records — no header, no footer:
//!
//! ```text
//! [u32 LE record_size][varint64 key_len][key][value]
//! [u32 LE record_size][varint64 key_len][key][value]
//! ...
//! ```
//!
//! `record_size` counts the bytes after the 4-byte header. Records carry no
//! checksum of their own; durability rides on flush+sync of the file.
//!
//! The SST-side index entry stored in place of a separated value:
//!
//! ```text
//! [u8 tag = 1][varint64 file_number][varint64 offset][varint64 size]
//! ```
//!
//! ## Lifecycle
//!
//! A vTable is written once by a flush, read many times, and deleted whole:
//! compaction reports each dropped index entry to the manager, and once a
//! file's invalidation count reaches its record count **and** no reader
//! holds a reference, the manager's garbage collector unlinks it on a
//! background thread.
//!
//! ## Error taxonomy
//!
//! - [`VTableError::Corruption`] — framing or decode failure; unrecoverable
//!   for that read, not necessarily fatal to the database.
//! - [`VTableError::Timeout`] — a reader observed a file the manager no
//!   longer lists; soft and retryable against a fresher version.
//! - [`VTableError::Io`] — propagated from the environment untranslated.

pub mod builder;
pub mod format;
pub mod manager;
pub mod reader;

#[cfg(test)]
mod tests;

pub use builder::VTableBuilder;
pub use format::{VTABLE_INDEX_TAG, VTableHandle, VTableIndex, VTableRecord};
pub use manager::{VTableManager, VTableMeta};
pub use reader::VTableReader;

use thiserror::Error;

use crate::encoding::EncodingError;

/// Errors returned by vTable operations.
///
/// The enum is cheap to clone so builders can latch their first error and
/// keep reporting it on every subsequent call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VTableError {
    /// Byte-level decode failure: bad framing, bad tag, length underflow,
    /// trailing bytes, or a size mismatch between handle and actual read.
    #[error("corruption: {0}")]
    Corruption(String),

    /// A reader observed a stale or deleted file. Soft and retryable.
    #[error("stale vtable read: {0}")]
    Timeout(String),

    /// Underlying I/O failure, propagated from the environment.
    #[error("I/O error: {0}")]
    Io(String),

    /// Internal invariant violation (poisoned lock, unexpected state).
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for VTableError {
    fn from(err: std::io::Error) -> Self {
        VTableError::Io(err.to_string())
    }
}

impl VTableError {
    /// Wrap a wire-level decode failure as corruption with context.
    fn corrupt(context: &str, err: EncodingError) -> Self {
        VTableError::Corruption(format!("{context}: {err}"))
    }
}
