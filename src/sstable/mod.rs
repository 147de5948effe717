//! Sorted String Table (SSTable) — the host engine's on-disk table format.
//!
//! An SSTable is an immutable, sorted file of internal-key/value cells. In a
//! key-value-separated store the cells are small by construction: large
//! values live in vTables and the SSTable keeps only index entries pointing
//! at them, so a table here is mostly keys.
//!
//! # On-disk layout
//!
//! ```text
//! [HEADER: magic (4 B) | version fixed32]
//! [DATA_BLOCK_LEN_LE][DATA_BLOCK_BYTES][DATA_BLOCK_CRC32_LE]
//! ...
//! [BLOOM_LEN_LE][BLOOM_BYTES][BLOOM_CRC32_LE]
//! [PROPS_LEN_LE][PROPS_BYTES][PROPS_CRC32_LE]
//! [INDEX_LEN_LE][INDEX_BYTES][INDEX_CRC32_LE]
//! [FOOTER: index/bloom/props handles | crc32 | magic]
//! ```
//!
//! - **Data blocks** — length-prefixed `[internal_key][internal_value]`
//!   cells, cut at [`DATA_BLOCK_MAX_SIZE`].
//! - **Bloom block** — filter over user keys for fast negative lookups.
//! - **Properties block** — entry count and smallest/largest internal key.
//! - **Index block** — first internal key and handle of every data block.
//!
//! Every block carries a CRC32; the footer carries its own. Input cells
//! must arrive sorted by user key with at most one cell per user key —
//! the flush and compaction paths both guarantee this.
//!
//! # Concurrency
//!
//! Tables are immutable: readers share one memory-mapped file through
//! [`TableCache`] with no locking beyond the cache map itself.

pub mod builder;


pub use builder::SstBuilder;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bloomfilter::Bloom;
use crc32fast::Hasher as Crc32;
use thiserror::Error;

use crate::encoding::{
    EncodingError, get_fixed32, get_fixed64, get_length_prefixed_slice, get_varint64,
};
use crate::env::{Env, RandomAccessFile};
use crate::filename::table_file_name;
use crate::ikey;

// ------------------------------------------------------------------------------------------------
// Constants
// ------------------------------------------------------------------------------------------------

const SST_MAGIC: [u8; 4] = *b"VST1";
const SST_VERSION: u32 = 1;
const SST_HEADER_SIZE: usize = 8;
/// Footer: three `(fixed64 offset, fixed64 len)` handles, crc32, magic.
const SST_FOOTER_SIZE: usize = 6 * 8 + 4 + 4;
const BLOCK_TRAILER_SIZE: usize = 4;
const BLOCK_HEADER_SIZE: usize = 4;

/// Data blocks are cut once their payload reaches this size.
pub const DATA_BLOCK_MAX_SIZE: usize = 4096;

/// False-positive rate the bloom filter is sized for.
pub const BLOOM_FALSE_POSITIVE_RATE: f64 = 0.01;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors returned by SSTable operations.
#[derive(Debug, Error)]
pub enum SstError {
    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Structural decode failure.
    #[error("corruption: {0}")]
    Corruption(String),

    /// A block's stored CRC32 disagrees with its contents.
    #[error("checksum mismatch in {0} block")]
    ChecksumMismatch(&'static str),

    /// Internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<EncodingError> for SstError {
    fn from(err: EncodingError) -> Self {
        SstError::Corruption(err.to_string())
    }
}

// ------------------------------------------------------------------------------------------------
// Block handles and index entries
// ------------------------------------------------------------------------------------------------

/// Location of one framed block: file offset and payload length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

/// Index entry pointing at one data block.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Internal key of the block's first cell.
    pub first_key: Vec<u8>,
    /// Where the block lives.
    pub handle: BlockHandle,
}

/// Table-level metadata stored in the properties block.
#[derive(Debug, Clone, Default)]
pub struct TableProperties {
    /// Number of cells in the table.
    pub entry_count: u64,
    /// Smallest internal key.
    pub smallest: Vec<u8>,
    /// Largest internal key.
    pub largest: Vec<u8>,
}

// ------------------------------------------------------------------------------------------------
// Table — the reader
// ------------------------------------------------------------------------------------------------

/// An open, verified SSTable.
pub struct Table {
    file: Arc<dyn RandomAccessFile>,
    index: Vec<IndexEntry>,
    bloom: Bloom<Vec<u8>>,
    /// Metadata decoded from the properties block.
    pub properties: TableProperties,
}

impl Table {
    /// Open and verify a table: footer, block checksums, index, bloom,
    /// properties. Fails with corruption on any structural mismatch.
    pub fn open(file: Arc<dyn RandomAccessFile>) -> Result<Self, SstError> {
        let file_len = file.len();
        if file_len < (SST_HEADER_SIZE + SST_FOOTER_SIZE) as u64 {
            return Err(SstError::Corruption(format!(
                "table of {file_len} bytes is smaller than header + footer"
            )));
        }

        // Header.
        let header = read_exact(&*file, 0, SST_HEADER_SIZE)?;
        if header[..4] != SST_MAGIC {
            return Err(SstError::Corruption("bad table magic".into()));
        }
        let mut cursor = &header[4..];
        let version = get_fixed32(&mut cursor)?;
        if version != SST_VERSION {
            return Err(SstError::Corruption(format!(
                "unsupported table version {version}"
            )));
        }

        // Footer.
        let footer = read_exact(&*file, file_len - SST_FOOTER_SIZE as u64, SST_FOOTER_SIZE)?;
        if footer[SST_FOOTER_SIZE - 4..] != SST_MAGIC {
            return Err(SstError::Corruption("bad footer magic".into()));
        }
        let mut cursor = &footer[..];
        let index_handle = read_handle(&mut cursor)?;
        let bloom_handle = read_handle(&mut cursor)?;
        let props_handle = read_handle(&mut cursor)?;
        let stored_crc = get_fixed32(&mut cursor)?;
        let mut hasher = Crc32::new();
        hasher.update(&footer[..6 * 8]);
        if hasher.finalize() != stored_crc {
            return Err(SstError::ChecksumMismatch("footer"));
        }

        // Index block.
        let index_payload = read_block(&*file, index_handle, "index")?;
        let mut cursor = index_payload.as_slice();
        let block_count = get_varint64(&mut cursor)?;
        let mut index = Vec::with_capacity(block_count as usize);
        for _ in 0..block_count {
            let first_key = get_length_prefixed_slice(&mut cursor)?.to_vec();
            let offset = get_varint64(&mut cursor)?;
            let size = get_varint64(&mut cursor)?;
            index.push(IndexEntry {
                first_key,
                handle: BlockHandle { offset, size },
            });
        }

        // Bloom block.
        let bloom_payload = read_block(&*file, bloom_handle, "bloom")?;
        let bloom = Bloom::from_slice(&bloom_payload)
            .map_err(|e| SstError::Corruption(format!("bloom filter: {e}")))?;

        // Properties block.
        let props_payload = read_block(&*file, props_handle, "properties")?;
        let mut cursor = props_payload.as_slice();
        let entry_count = get_varint64(&mut cursor)?;
        let smallest = get_length_prefixed_slice(&mut cursor)?.to_vec();
        let largest = get_length_prefixed_slice(&mut cursor)?.to_vec();

        Ok(Self {
            file,
            index,
            bloom,
            properties: TableProperties {
                entry_count,
                smallest,
                largest,
            },
        })
    }

    /// Point lookup by user key.
    ///
    /// Returns the cell's internal key and internal value, or `None` if the
    /// table holds no cell for the key.
    pub fn get(&self, user_key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, SstError> {
        if !self.bloom.check(&user_key.to_vec()) {
            return Ok(None);
        }

        // Last block whose first user key is <= the target.
        let idx = self
            .index
            .partition_point(|entry| ikey::user_key(&entry.first_key) <= user_key);
        if idx == 0 {
            return Ok(None);
        }

        let cells = self.read_data_block(self.index[idx - 1].handle)?;
        for (key, value) in cells {
            if ikey::user_key(&key) == user_key {
                return Ok(Some((key, value)));
            }
        }
        Ok(None)
    }

    /// Iterate every cell in user-key order.
    pub fn iter(&self) -> TableIter<'_> {
        TableIter {
            table: self,
            next_block: 0,
            cells: Vec::new(),
            cell_pos: 0,
            failed: false,
        }
    }

    fn read_data_block(&self, handle: BlockHandle) -> Result<Vec<(Vec<u8>, Vec<u8>)>, SstError> {
        let payload = read_block(&*self.file, handle, "data")?;
        let mut cursor = payload.as_slice();
        let mut cells = Vec::new();
        while !cursor.is_empty() {
            let key = get_length_prefixed_slice(&mut cursor)?.to_vec();
            let value = get_length_prefixed_slice(&mut cursor)?.to_vec();
            cells.push((key, value));
        }
        Ok(cells)
    }
}

/// Streaming iterator over a table's cells.
///
/// Yields `Err` once on the first unreadable block, then ends.
pub struct TableIter<'a> {
    table: &'a Table,
    next_block: usize,
    cells: Vec<(Vec<u8>, Vec<u8>)>,
    cell_pos: usize,
    failed: bool,
}

impl Iterator for TableIter<'_> {
    type Item = Result<(Vec<u8>, Vec<u8>), SstError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if self.cell_pos < self.cells.len() {
                let cell = self.cells[self.cell_pos].clone();
                self.cell_pos += 1;
                return Some(Ok(cell));
            }
            if self.next_block >= self.table.index.len() {
                return None;
            }
            let handle = self.table.index[self.next_block].handle;
            self.next_block += 1;
            match self.table.read_data_block(handle) {
                Ok(cells) => {
                    self.cells = cells;
                    self.cell_pos = 0;
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Block I/O helpers
// ------------------------------------------------------------------------------------------------

fn read_exact(file: &dyn RandomAccessFile, offset: u64, len: usize) -> Result<Vec<u8>, SstError> {
    let buf = file.read(offset, len)?;
    if buf.len() != len {
        return Err(SstError::Corruption(format!(
            "short read: wanted {len} bytes at offset {offset}, got {}",
            buf.len()
        )));
    }
    Ok(buf)
}

fn read_handle(cursor: &mut &[u8]) -> Result<BlockHandle, SstError> {
    let offset = get_fixed64(cursor)?;
    let size = get_fixed64(cursor)?;
    Ok(BlockHandle { offset, size })
}

/// Read one framed block and verify its length field and CRC32.
fn read_block(
    file: &dyn RandomAccessFile,
    handle: BlockHandle,
    what: &'static str,
) -> Result<Vec<u8>, SstError> {
    let framed_len = BLOCK_HEADER_SIZE + handle.size as usize + BLOCK_TRAILER_SIZE;
    let framed = read_exact(file, handle.offset, framed_len)?;

    let mut cursor = framed.as_slice();
    let stored_len = get_fixed32(&mut cursor)?;
    if u64::from(stored_len) != handle.size {
        return Err(SstError::Corruption(format!(
            "{what} block length field {stored_len} disagrees with handle {}",
            handle.size
        )));
    }

    let (payload, mut trailer) = cursor.split_at(handle.size as usize);
    let stored_crc = get_fixed32(&mut trailer)?;
    let mut hasher = Crc32::new();
    hasher.update(payload);
    if hasher.finalize() != stored_crc {
        return Err(SstError::ChecksumMismatch(what));
    }
    Ok(payload.to_vec())
}

// ------------------------------------------------------------------------------------------------
// TableCache
// ------------------------------------------------------------------------------------------------

/// Cache of open tables keyed by file number.
///
/// Opening a table verifies it whole-structure; the flush path uses that as
/// its post-write check before publishing a new SST.
pub struct TableCache {
    dbname: PathBuf,
    env: Arc<dyn Env>,
    cache: Mutex<HashMap<u64, Arc<Table>>>,
}

impl TableCache {
    pub fn new(dbname: impl Into<PathBuf>, env: Arc<dyn Env>) -> Self {
        Self {
            dbname: dbname.into(),
            env,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Open (or fetch the cached) table `number`, verifying it on first
    /// open.
    pub fn open(&self, number: u64) -> Result<Arc<Table>, SstError> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| SstError::Internal("table cache mutex poisoned".into()))?;
        if let Some(table) = cache.get(&number) {
            return Ok(Arc::clone(table));
        }

        let path = table_file_name(&self.dbname, number);
        let file = self.env.new_random_access_file(&path)?;
        let table = Arc::new(Table::open(file)?);
        cache.insert(number, Arc::clone(&table));
        Ok(table)
    }

    /// Forget a table whose file is being deleted.
    pub fn evict(&self, number: u64) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(&number);
        }
    }
}
