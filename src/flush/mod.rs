//! Flush-time separation — one sorted stream in, an SST and a vTable out.
//!
//! [`build_table`] drains a flush iterator of internal key/value pairs once
//! and routes every entry by a single size threshold: values below
//! `kv_sep_size` go inline into the SSTable, values at or above it are
//! appended to a vTable and the SSTable stores an index entry in their
//! place.
//!
//! # Durability order
//!
//! On success the SST is finished, synced, and closed **before** the vTable
//! is. The engine's publish step runs after both, so a crash between the
//! two syncs can never expose an SST whose index entries point at an
//! unsynced vTable.
//!
//! # Failure handling
//!
//! Any error — a malformed internal key in the stream, a builder failure,
//! an I/O failure, or post-write verification finding a bad table — aborts
//! the whole flush: both builders are abandoned and both files unlinked.


use std::io;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::engine::DbConfig;
use crate::env::Env;
use crate::filename::{table_file_name, vtable_file_name};
use crate::ikey::{TAG_VALUE, parse_internal_key};
use crate::sstable::{SstBuilder, SstError, TableCache};
use crate::vtable::{VTableBuilder, VTableError, VTableIndex, VTableMeta, VTableRecord};

/// Errors returned by [`build_table`].
#[derive(Debug, Error)]
pub enum FlushError {
    /// SSTable construction or verification failed.
    #[error("sstable: {0}")]
    Sst(#[from] SstError),

    /// vTable construction failed.
    #[error("vtable: {0}")]
    VTable(#[from] VTableError),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The flush stream yielded a malformed internal key.
    #[error("corruption: {0}")]
    Corruption(String),
}

/// Metadata of the SSTable produced by a flush.
#[derive(Debug, Clone, Default)]
pub struct FileMetaData {
    /// File number, allocated by the engine before the flush.
    pub number: u64,
    /// Final size in bytes; 0 if no table was produced.
    pub file_size: u64,
    /// Smallest internal key in the table.
    pub smallest: Vec<u8>,
    /// Largest internal key in the table.
    pub largest: Vec<u8>,
}

/// Drain `iter` into an SST at `table_file(meta.number)` plus, when any
/// value crosses the separation threshold, a vTable at
/// `vtable_file(meta.number)`.
///
/// Returns the metadata of the vTable; `table_size == 0` means every value
/// stayed inline and no vTable file exists. An empty iterator produces no
/// files at all.
pub fn build_table(
    dbname: &Path,
    env: &Arc<dyn Env>,
    config: &DbConfig,
    table_cache: &TableCache,
    iter: impl Iterator<Item = (Vec<u8>, Vec<u8>)>,
    meta: &mut FileMetaData,
) -> Result<VTableMeta, FlushError> {
    meta.file_size = 0;
    let mut vtable_meta = VTableMeta::default();

    let mut iter = iter.peekable();
    if iter.peek().is_none() {
        return Ok(vtable_meta);
    }

    let result = write_files(dbname, env, config, table_cache, iter, meta, &mut vtable_meta);
    if result.is_err() {
        // Abort: neither half of the flush survives.
        table_cache.evict(meta.number);
        remove_quietly(env, &table_file_name(dbname, meta.number));
        remove_quietly(env, &vtable_file_name(dbname, meta.number));
        meta.file_size = 0;
        vtable_meta = VTableMeta::default();
    }
    result.map(|()| vtable_meta)
}

fn write_files(
    dbname: &Path,
    env: &Arc<dyn Env>,
    config: &DbConfig,
    table_cache: &TableCache,
    iter: impl Iterator<Item = (Vec<u8>, Vec<u8>)>,
    meta: &mut FileMetaData,
    vtable_meta: &mut VTableMeta,
) -> Result<(), FlushError> {
    let table_path = table_file_name(dbname, meta.number);
    let vtable_path = vtable_file_name(dbname, meta.number);

    let mut sst = SstBuilder::new(env.new_writable_file(&table_path)?);
    let mut vtb = VTableBuilder::new(env.new_writable_file(&vtable_path)?);

    let mut smallest: Option<Vec<u8>> = None;
    let mut largest: Vec<u8> = Vec::new();

    for (key, value) in iter {
        if smallest.is_none() {
            smallest = Some(key.clone());
        }

        if value.len() < config.kv_sep_size || value.first() != Some(&TAG_VALUE) {
            // Small values, deletions, and anything else the read path must
            // see verbatim stay inline.
            sst.add(&key, &value)?;
        } else {
            let Some(parsed) = parse_internal_key(&key) else {
                sst.abandon();
                vtb.abandon();
                return Err(FlushError::Corruption(
                    "malformed internal key in flush stream".into(),
                ));
            };

            let record = VTableRecord {
                key: parsed.user_key.to_vec(),
                value: value[1..].to_vec(),
            };
            let handle = vtb.add(&record)?;

            let index = VTableIndex {
                file_number: meta.number,
                handle,
            };
            let mut value_index = Vec::new();
            index.encode_to(&mut value_index);
            sst.add(&key, &value_index)?;
        }

        largest = key;
    }

    meta.smallest = smallest.unwrap_or_default();
    meta.largest = largest;

    // SST first: finish, sync, close.
    meta.file_size = sst.finish()?;
    let mut sst_file = sst.into_file();
    sst_file.sync()?;
    sst_file.close()?;

    // Then the vTable, same sequence.
    vtable_meta.number = meta.number;
    vtable_meta.records_num = vtb.records_written();
    vtable_meta.table_size = vtb.file_size();
    vtb.finish()?;
    let mut vtb_file = vtb.into_file();
    vtb_file.sync()?;
    vtb_file.close()?;

    // Verify the new table is readable before publishing it.
    table_cache.open(meta.number)?;

    if vtable_meta.table_size == 0 {
        // Every value stayed inline; drop the empty side file.
        remove_quietly(env, &vtable_path);
    }

    info!(
        number = meta.number,
        sst_bytes = meta.file_size,
        separated_records = vtable_meta.records_num,
        vtable_bytes = vtable_meta.table_size,
        "flush built table"
    );
    Ok(())
}

fn remove_quietly(env: &Arc<dyn Env>, path: &Path) {
    if env.file_exists(path)
        && let Err(e) = env.remove_file(path)
    {
        warn!(path = %path.display(), error = %e, "failed to remove flush artifact");
    }
}
