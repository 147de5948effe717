//! Whole-tree compaction — merge tables, report dropped index entries.
//!
//! Merges every input table into at most one output, keeping the newest
//! version of each key and dropping tombstones. Compaction is where vTable
//! records die: each dropped cell that carried a vTable index entry is
//! reported to the manager as an invalidation, and the manager may schedule
//! garbage collection of fully dead files before this function returns.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::env::Env;
use crate::filename::table_file_name;
use crate::ikey::{TAG_DELETION, TAG_VTABLE_INDEX, user_key};
use crate::sstable::{SstBuilder, SstError, Table, TableCache};
use crate::vtable::{VTableError, VTableIndex, VTableManager};

/// Errors returned by compaction.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// SSTable read or write failure.
    #[error("sstable: {0}")]
    Sst(#[from] SstError),

    /// vTable manager failure.
    #[error("vtable: {0}")]
    VTable(#[from] VTableError),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Outcome of a compaction run.
pub struct CompactionResult {
    /// The merged table, or `None` when every key was deleted.
    pub output: Option<Arc<Table>>,

    /// File numbers of the removed input tables.
    pub removed: Vec<u64>,

    /// vTable index entries invalidated during the merge.
    pub invalidated: u64,
}

/// Merge `input` (newest first) into one table at `output_number`.
///
/// Input files are unlinked on success; vTable files are left to the
/// manager's garbage collector, which this call may trigger through its
/// invalidation reports.
pub fn compact_tables(
    dbname: &Path,
    env: &Arc<dyn Env>,
    table_cache: &TableCache,
    manager: &VTableManager,
    input: &[(u64, Arc<Table>)],
    output_number: u64,
) -> Result<CompactionResult, CompactionError> {
    let mut invalidated = 0u64;

    // Oldest table first: newer layers overwrite older ones, and whatever
    // an insert displaces is a dropped (superseded) cell.
    let mut merged: BTreeMap<Vec<u8>, (Vec<u8>, Vec<u8>)> = BTreeMap::new();
    for (_, table) in input.iter().rev() {
        for cell in table.iter() {
            let (internal_key, internal_value) = cell?;
            let key = user_key(&internal_key).to_vec();
            if let Some((_, dropped)) = merged.insert(key, (internal_key, internal_value)) {
                invalidated += report_if_separated(manager, &dropped);
            }
        }
    }

    // Tombstones have done their shadowing work; a full merge drops them.
    merged.retain(|_, (_, internal_value)| internal_value.first() != Some(&TAG_DELETION));

    let output = if merged.is_empty() {
        None
    } else {
        Some(write_output(env, dbname, table_cache, output_number, &merged)?)
    };

    // Unlink the inputs. vTable invalidation already happened above;
    // their files fall to the manager's GC.
    let mut removed = Vec::with_capacity(input.len());
    for (number, _) in input {
        table_cache.evict(*number);
        let path = table_file_name(dbname, *number);
        if let Err(e) = env.remove_file(&path) {
            warn!(number, error = %e, "failed to remove compacted table");
        }
        removed.push(*number);
    }

    info!(
        inputs = removed.len(),
        output_entries = ?output.as_ref().map(|t| t.properties.entry_count),
        invalidated,
        "compaction complete"
    );

    Ok(CompactionResult {
        output,
        removed,
        invalidated,
    })
}

/// Report a dropped cell to the manager if it pointed into a vTable.
///
/// Accounting drift (an index entry naming a file the manager no longer
/// lists) is logged and tolerated; compaction must not die on it.
fn report_if_separated(manager: &VTableManager, internal_value: &[u8]) -> u64 {
    if internal_value.first() != Some(&TAG_VTABLE_INDEX) {
        return 0;
    }
    let mut cursor = internal_value;
    match VTableIndex::decode(&mut cursor) {
        Ok(index) => match manager.add_invalid(index.file_number) {
            Ok(()) => 1,
            Err(VTableError::Corruption(_)) => {
                warn!(
                    number = index.file_number,
                    "dropped index entry for unmanaged vtable"
                );
                0
            }
            Err(e) => {
                warn!(error = %e, "failed to record vtable invalidation");
                0
            }
        },
        Err(e) => {
            warn!(error = %e, "undecodable index entry dropped during compaction");
            0
        }
    }
}

fn write_output(
    env: &Arc<dyn Env>,
    dbname: &Path,
    table_cache: &TableCache,
    output_number: u64,
    merged: &BTreeMap<Vec<u8>, (Vec<u8>, Vec<u8>)>,
) -> Result<Arc<Table>, CompactionError> {
    let path = table_file_name(dbname, output_number);

    let result = (|| {
        let mut builder = SstBuilder::new(env.new_writable_file(&path)?);
        for (internal_key, internal_value) in merged.values() {
            builder.add(internal_key, internal_value)?;
        }
        builder.finish()?;
        let mut file = builder.into_file();
        file.sync()?;
        file.close()?;

        // Same post-write verification as flush: never publish a table
        // that cannot be read back.
        Ok(table_cache.open(output_number)?)
    })();

    if result.is_err() {
        table_cache.evict(output_number);
        if env.file_exists(&path)
            && let Err(e) = env.remove_file(&path)
        {
            warn!(path = %path.display(), error = %e, "failed to remove compaction output");
        }
    }
    result
}
