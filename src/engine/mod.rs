//! # Storage engine — the host around key-value separation
//!
//! A deliberately small LSM engine: an in-memory ordered write buffer, a
//! flat set of SSTables, and the vTable layer underneath. It exists to give
//! the separation machinery a real host: flushes route large values into
//! vTables, reads resolve index entries back through the manager, and
//! compaction reports every dropped index entry so dead vTables get
//! collected.
//!
//! ## Read path
//!
//! `get` consults the write buffer first, then tables newest-first. The
//! first cell found for a key decides the outcome on a single byte:
//!
//! | value tag | meaning                                     |
//! |-----------|---------------------------------------------|
//! | 0         | deletion — the key is gone                  |
//! | 1         | vTable index — resolve through a reader     |
//! | 2         | inline value — strip the tag and return     |
//!
//! ## Durability
//!
//! Mutations live in the write buffer until [`Db::flush`]; the buffer is
//! not write-ahead logged (the WAL belongs to the full host engine, outside
//! this crate's scope). Flush and compaction publish their results by
//! persisting the vTable manifest after the data files are synced.
//!
//! ## Concurrency
//!
//! Engine state sits behind one `RwLock`: reads share it, mutations take it
//! exclusively. The vTable manager keeps its own mutex and the background
//! GC worker never touches engine state.

pub mod fields_ops;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use tracing::{info, warn};

use crate::compaction::{self, CompactionError};
use crate::env::{DiskEnv, Env};
use crate::fields::FieldsError;
use crate::filename::{FileKind, parse_file_name, vtable_file_name};
use crate::flush::{FileMetaData, FlushError, build_table};
use crate::ikey::{
    TAG_DELETION, TAG_VALUE, TAG_VTABLE_INDEX, encode_internal_key, parse_internal_key,
};
use crate::sstable::{SstError, Table, TableCache};
use crate::vtable::{VTableError, VTableIndex, VTableManager, VTableReader};

/// Default separation threshold: values of 1 KiB and above leave the SST.
pub const DEFAULT_KV_SEP_SIZE: usize = 1024;

/// Default GC threshold: collect once 1 MiB of dead vTable bytes exist.
pub const DEFAULT_GC_THRESHOLD: u64 = 1 << 20;

// ------------------------------------------------------------------------------------------------
// Error type
// ------------------------------------------------------------------------------------------------

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Error from the flush-time separator.
    #[error("flush error: {0}")]
    Flush(#[from] FlushError),

    /// Error from the SSTable subsystem.
    #[error("sstable error: {0}")]
    Sst(#[from] SstError),

    /// Error from the vTable subsystem.
    #[error("vtable error: {0}")]
    VTable(#[from] VTableError),

    /// Error from compaction.
    #[error("compaction error: {0}")]
    Compaction(#[from] CompactionError),

    /// A stored fields value failed to decode.
    #[error("fields error: {0}")]
    Fields(#[from] FieldsError),

    /// Underlying filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Internal invariant violation (poisoned lock, unexpected state).
    #[error("internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Configuration
// ------------------------------------------------------------------------------------------------

/// Configuration for a [`Db`] instance.
#[derive(Clone)]
pub struct DbConfig {
    /// Minimum internal-value byte length at or above which a value is
    /// written to a vTable instead of inline in the SST.
    pub kv_sep_size: usize,

    /// Combined dead-vTable byte size at or above which the manager
    /// schedules a background unlink pass.
    pub gc_threshold: u64,

    /// Filesystem and thread primitive.
    pub env: Arc<dyn Env>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            kv_sep_size: DEFAULT_KV_SEP_SIZE,
            gc_threshold: DEFAULT_GC_THRESHOLD,
            env: DiskEnv::shared(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Engine state
// ------------------------------------------------------------------------------------------------

/// One buffered mutation: the sequence it happened at and its tag-prefixed
/// internal value.
struct MemEntry {
    sequence: u64,
    internal_value: Vec<u8>,
}

/// An open table and its file number.
struct TableHandle {
    number: u64,
    table: Arc<Table>,
}

struct DbInner {
    /// Ordered write buffer: user key to latest mutation.
    memtable: BTreeMap<Vec<u8>, MemEntry>,

    /// Open tables, newest first.
    tables: Vec<TableHandle>,

    /// Next file number to allocate. Shared with vTables.
    next_file_number: u64,

    /// Sequence of the latest mutation.
    last_sequence: u64,
}

/// The storage engine handle. Clone freely; all clones share state.
pub struct Db {
    dbname: PathBuf,
    config: DbConfig,
    env: Arc<dyn Env>,
    manager: Arc<VTableManager>,
    table_cache: Arc<TableCache>,
    inner: Arc<RwLock<DbInner>>,
}

impl Clone for Db {
    fn clone(&self) -> Self {
        Self {
            dbname: self.dbname.clone(),
            config: self.config.clone(),
            env: Arc::clone(&self.env),
            manager: Arc::clone(&self.manager),
            table_cache: Arc::clone(&self.table_cache),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Db {
    /// Open (or create) a database rooted at `path`.
    ///
    /// Loads the vTable manifest (a corrupt manifest aborts the open),
    /// opens every live table, removes orphaned vTable files left behind by
    /// interrupted flushes, and resumes the file-number counter past
    /// everything on disk.
    pub fn open(path: impl AsRef<Path>, config: DbConfig) -> Result<Self, DbError> {
        let dbname = path.as_ref().to_path_buf();
        let env = Arc::clone(&config.env);
        env.create_dir_all(&dbname)?;

        let manager = Arc::new(VTableManager::new(
            &dbname,
            Arc::clone(&env),
            config.gc_threshold,
        ));
        manager.load()?;

        let table_cache = Arc::new(TableCache::new(&dbname, Arc::clone(&env)));

        // Scan the directory: open tables, reclaim unmanaged vTables.
        let managed = manager.live_numbers()?;
        let mut table_numbers = Vec::new();
        let mut max_number = 0u64;
        for entry in env.list_dir(&dbname)? {
            let Some((kind, number)) = parse_file_name(&entry) else {
                continue;
            };
            max_number = max_number.max(number);
            match kind {
                FileKind::Table => table_numbers.push(number),
                FileKind::VTable => {
                    if !managed.contains(&number) {
                        warn!(number, "removing orphaned vtable file");
                        let _ = env.remove_file(&entry);
                    }
                }
            }
        }
        max_number = max_number.max(managed.last().copied().unwrap_or(0));

        // Newest first, so reads hit the most recent flush first.
        table_numbers.sort_unstable_by(|a, b| b.cmp(a));
        let mut tables = Vec::with_capacity(table_numbers.len());
        let mut last_sequence = 0u64;
        for number in table_numbers {
            let table = table_cache.open(number)?;
            if let Some(parsed) = parse_internal_key(&table.properties.largest) {
                last_sequence = last_sequence.max(parsed.sequence);
            }
            tables.push(TableHandle { number, table });
        }

        info!(
            path = %dbname.display(),
            tables = tables.len(),
            vtables = managed.len(),
            "database opened"
        );

        Ok(Self {
            dbname,
            config,
            env,
            manager,
            table_cache,
            inner: Arc::new(RwLock::new(DbInner {
                memtable: BTreeMap::new(),
                tables,
                next_file_number: max_number + 1,
                last_sequence,
            })),
        })
    }

    /// Flush outstanding mutations and persist the vTable manifest.
    pub fn close(&self) -> Result<(), DbError> {
        self.flush()?;
        self.manager.save()?;
        Ok(())
    }

    /// Handle to the vTable manager, for invalidation-driven tooling.
    pub fn vtable_manager(&self) -> Arc<VTableManager> {
        Arc::clone(&self.manager)
    }

    fn read_inner(&self) -> Result<RwLockReadGuard<'_, DbInner>, DbError> {
        self.inner
            .read()
            .map_err(|_| DbError::Internal("engine RwLock poisoned".into()))
    }

    fn write_inner(&self) -> Result<RwLockWriteGuard<'_, DbInner>, DbError> {
        self.inner
            .write()
            .map_err(|_| DbError::Internal("engine RwLock poisoned".into()))
    }

    // --------------------------------------------------------------------
    // Writes
    // --------------------------------------------------------------------

    /// Insert or overwrite a key.
    pub fn put(&self, key: impl Into<Vec<u8>>, value: &[u8]) -> Result<(), DbError> {
        let mut inner = self.write_inner()?;
        inner.last_sequence += 1;
        let sequence = inner.last_sequence;

        let mut internal_value = Vec::with_capacity(1 + value.len());
        internal_value.push(TAG_VALUE);
        internal_value.extend_from_slice(value);

        inner.memtable.insert(
            key.into(),
            MemEntry {
                sequence,
                internal_value,
            },
        );
        Ok(())
    }

    /// Delete a key.
    pub fn delete(&self, key: impl Into<Vec<u8>>) -> Result<(), DbError> {
        let mut inner = self.write_inner()?;
        inner.last_sequence += 1;
        let sequence = inner.last_sequence;
        inner.memtable.insert(
            key.into(),
            MemEntry {
                sequence,
                internal_value: vec![TAG_DELETION],
            },
        );
        Ok(())
    }

    // --------------------------------------------------------------------
    // Reads
    // --------------------------------------------------------------------

    /// Point lookup. Separated values are resolved transparently.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        let inner = self.read_inner()?;

        if let Some(entry) = inner.memtable.get(key) {
            return self.resolve_internal_value(&entry.internal_value);
        }

        for handle in &inner.tables {
            if let Some((_, internal_value)) = handle.table.get(key)? {
                return self.resolve_internal_value(&internal_value);
            }
        }
        Ok(None)
    }

    /// Classify an internal value by its tag and produce the user value.
    fn resolve_internal_value(&self, internal_value: &[u8]) -> Result<Option<Vec<u8>>, DbError> {
        match internal_value.first() {
            None | Some(&TAG_DELETION) => Ok(None),
            Some(&TAG_VALUE) => Ok(Some(internal_value[1..].to_vec())),
            Some(&TAG_VTABLE_INDEX) => Ok(Some(self.read_separated(internal_value)?)),
            Some(&tag) => Err(DbError::VTable(VTableError::Corruption(format!(
                "unknown value tag {tag:#04x}"
            )))),
        }
    }

    /// Resolve an SST-side index entry through the vTable layer.
    fn read_separated(&self, index_bytes: &[u8]) -> Result<Vec<u8>, DbError> {
        let mut cursor = index_bytes;
        let index = VTableIndex::decode(&mut cursor)?;

        let path = vtable_file_name(&self.dbname, index.file_number);
        let reader = VTableReader::open_managed(
            &self.env,
            &path,
            index.file_number,
            Arc::clone(&self.manager),
        )?;
        let record = reader.get(&index.handle)?;
        Ok(record.value)
    }

    /// Ordered snapshot of every live `(key, value)` pair, separated values
    /// resolved.
    pub fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, DbError> {
        let inner = self.read_inner()?;

        // Oldest table first, newer layers overwrite older ones.
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for handle in inner.tables.iter().rev() {
            for cell in handle.table.iter() {
                let (internal_key, internal_value) = cell?;
                let user_key = crate::ikey::user_key(&internal_key).to_vec();
                merged.insert(user_key, internal_value);
            }
        }
        for (key, entry) in &inner.memtable {
            merged.insert(key.clone(), entry.internal_value.clone());
        }
        drop(inner);

        let mut out = Vec::with_capacity(merged.len());
        for (key, internal_value) in merged {
            if let Some(value) = self.resolve_internal_value(&internal_value)? {
                out.push((key, value));
            }
        }
        Ok(out)
    }

    // --------------------------------------------------------------------
    // Flush
    // --------------------------------------------------------------------

    /// Drain the write buffer into a new SST (+ vTable when separation
    /// applies) and register the vTable with the manager.
    pub fn flush(&self) -> Result<(), DbError> {
        let mut inner = self.write_inner()?;
        if inner.memtable.is_empty() {
            return Ok(());
        }

        let number = inner.next_file_number;
        inner.next_file_number += 1;

        let mut meta = FileMetaData {
            number,
            ..FileMetaData::default()
        };

        let stream = inner.memtable.iter().map(|(key, entry)| {
            let tag = entry.internal_value.first().copied().unwrap_or(TAG_DELETION);
            (
                encode_internal_key(key, entry.sequence, tag),
                entry.internal_value.clone(),
            )
        });

        let vtable_meta = build_table(
            &self.dbname,
            &self.env,
            &self.config,
            &self.table_cache,
            stream,
            &mut meta,
        )?;

        // Publish: register the vTable, persist the manifest, expose the
        // table to reads, drop the buffer.
        if vtable_meta.table_size > 0 {
            self.manager.add(vtable_meta)?;
        }
        self.manager.save()?;

        let table = self.table_cache.open(number)?;
        inner.tables.insert(0, TableHandle { number, table });
        inner.memtable.clear();
        Ok(())
    }

    // --------------------------------------------------------------------
    // Compaction
    // --------------------------------------------------------------------

    /// Merge every table into one, keeping the newest version of each key,
    /// dropping tombstones, and reporting every dropped vTable index entry
    /// to the manager (which may schedule GC).
    pub fn compact(&self) -> Result<(), DbError> {
        let mut inner = self.write_inner()?;
        if inner.tables.is_empty() {
            return Ok(());
        }

        let output_number = inner.next_file_number;
        inner.next_file_number += 1;

        let input: Vec<(u64, Arc<Table>)> = inner
            .tables
            .iter()
            .map(|handle| (handle.number, Arc::clone(&handle.table)))
            .collect();

        let result = compaction::compact_tables(
            &self.dbname,
            &self.env,
            &self.table_cache,
            &self.manager,
            &input,
            output_number,
        )?;

        inner.tables = match result.output {
            Some(table) => vec![TableHandle {
                number: output_number,
                table,
            }],
            None => Vec::new(),
        };
        drop(inner);

        self.manager.save()?;
        Ok(())
    }
}
