//! SSTable writer — builds one table from a sorted cell stream.

use bloomfilter::Bloom;
use crc32fast::Hasher as Crc32;

use crate::encoding::{put_fixed32, put_fixed64, put_length_prefixed_slice, put_varint64};
use crate::env::WritableFile;
use crate::ikey;

use super::{
    BLOOM_FALSE_POSITIVE_RATE, BlockHandle, DATA_BLOCK_MAX_SIZE, IndexEntry, SST_MAGIC,
    SST_VERSION, SstError,
};

/// Streaming SSTable builder.
///
/// Cells must arrive sorted by user key, one cell per user key. The builder
/// cuts data blocks at [`DATA_BLOCK_MAX_SIZE`], accumulates the block index
/// and bloom keys in memory, and writes filter, properties, index, and
/// footer on [`finish`](SstBuilder::finish).
///
/// Like the vTable builder, `finish` flushes but leaves sync and close to
/// the caller, which orders durability across the SST and its vTable.
pub struct SstBuilder {
    file: Box<dyn WritableFile>,
    offset: u64,
    block: Vec<u8>,
    block_first_key: Option<Vec<u8>>,
    index: Vec<IndexEntry>,
    bloom_keys: Vec<Vec<u8>>,
    entry_count: u64,
    smallest: Option<Vec<u8>>,
    largest: Option<Vec<u8>>,
    header_written: bool,
}

impl SstBuilder {
    /// Start building into `file`, which must be empty.
    pub fn new(file: Box<dyn WritableFile>) -> Self {
        Self {
            file,
            offset: 0,
            block: Vec::new(),
            block_first_key: None,
            index: Vec::new(),
            bloom_keys: Vec::new(),
            entry_count: 0,
            smallest: None,
            largest: None,
            header_written: false,
        }
    }

    /// Append one cell.
    pub fn add(&mut self, internal_key: &[u8], internal_value: &[u8]) -> Result<(), SstError> {
        if !self.header_written {
            self.write_header()?;
        }

        if self.block_first_key.is_none() {
            self.block_first_key = Some(internal_key.to_vec());
        }
        if self.smallest.is_none() {
            self.smallest = Some(internal_key.to_vec());
        }
        self.largest = Some(internal_key.to_vec());

        self.bloom_keys.push(ikey::user_key(internal_key).to_vec());
        self.entry_count += 1;

        put_length_prefixed_slice(&mut self.block, internal_key);
        put_length_prefixed_slice(&mut self.block, internal_value);

        if self.block.len() >= DATA_BLOCK_MAX_SIZE {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Write filter, properties, index, and footer, then flush the file.
    ///
    /// Returns the final file size. Fails if no cell was added — an empty
    /// table has no reason to exist.
    pub fn finish(&mut self) -> Result<u64, SstError> {
        if self.entry_count == 0 {
            return Err(SstError::Internal("refusing to build an empty table".into()));
        }
        if !self.block.is_empty() {
            self.flush_block()?;
        }

        // Bloom filter over user keys, sized to the exact entry count.
        let mut bloom = Bloom::new_for_fp_rate(self.bloom_keys.len(), BLOOM_FALSE_POSITIVE_RATE)
            .map_err(|e| SstError::Internal(e.to_string()))?;
        for key in &self.bloom_keys {
            bloom.set(key);
        }
        let bloom_handle = self.write_framed_block(&bloom.as_slice().to_vec())?;

        // Properties block.
        let mut props = Vec::new();
        put_varint64(&mut props, self.entry_count);
        put_length_prefixed_slice(&mut props, self.smallest.as_deref().unwrap_or_default());
        put_length_prefixed_slice(&mut props, self.largest.as_deref().unwrap_or_default());
        let props_handle = self.write_framed_block(&props)?;

        // Index block.
        let mut index = Vec::new();
        put_varint64(&mut index, self.index.len() as u64);
        for entry in &self.index {
            put_length_prefixed_slice(&mut index, &entry.first_key);
            put_varint64(&mut index, entry.handle.offset);
            put_varint64(&mut index, entry.handle.size);
        }
        let index_handle = self.write_framed_block(&index)?;

        // Footer.
        let mut footer = Vec::new();
        for handle in [index_handle, bloom_handle, props_handle] {
            put_fixed64(&mut footer, handle.offset);
            put_fixed64(&mut footer, handle.size);
        }
        let mut hasher = Crc32::new();
        hasher.update(&footer);
        let crc = hasher.finalize();
        put_fixed32(&mut footer, crc);
        footer.extend_from_slice(&SST_MAGIC);

        self.file.append(&footer)?;
        self.offset += footer.len() as u64;

        self.file.flush()?;
        Ok(self.offset)
    }

    /// Discard the builder. The caller unlinks the half-written file.
    pub fn abandon(self) {}

    /// Cells added so far.
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Bytes written so far (final only after `finish`).
    pub fn file_size(&self) -> u64 {
        self.offset
    }

    /// Give the file back so the caller can sync and close it.
    pub fn into_file(self) -> Box<dyn WritableFile> {
        self.file
    }

    fn write_header(&mut self) -> Result<(), SstError> {
        let mut header = Vec::with_capacity(8);
        header.extend_from_slice(&SST_MAGIC);
        put_fixed32(&mut header, SST_VERSION);
        self.file.append(&header)?;
        self.offset += header.len() as u64;
        self.header_written = true;
        Ok(())
    }

    fn flush_block(&mut self) -> Result<(), SstError> {
        let payload = std::mem::take(&mut self.block);
        let handle = self.write_framed_block(&payload)?;
        let first_key = self.block_first_key.take().ok_or_else(|| {
            SstError::Internal("data block flushed without a first key".into())
        })?;
        self.index.push(IndexEntry { first_key, handle });
        Ok(())
    }

    /// Write `[fixed32 len][payload][fixed32 crc]`, returning the handle.
    fn write_framed_block(&mut self, payload: &[u8]) -> Result<BlockHandle, SstError> {
        let handle = BlockHandle {
            offset: self.offset,
            size: payload.len() as u64,
        };

        let mut framed = Vec::with_capacity(payload.len() + 8);
        put_fixed32(&mut framed, payload.len() as u32);
        framed.extend_from_slice(payload);
        let mut hasher = Crc32::new();
        hasher.update(payload);
        put_fixed32(&mut framed, hasher.finalize());

        self.file.append(&framed)?;
        self.offset += framed.len() as u64;
        Ok(handle)
    }
}
