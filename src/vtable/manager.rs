//! Authoritative vTable liveness metadata, garbage collection, persistence.
//!
//! The manager owns, per vTable file: how many records it holds, how many of
//! them compaction has invalidated, its on-disk size, and how many readers
//! currently hold it open. A file whose invalidation count has reached its
//! record count is **dead**; dead files with no readers are unlinked in
//! batches by a detached background worker once their combined size crosses
//! the configured threshold.
//!
//! # Persistence
//!
//! The full table is persisted to `VTABLEMETA`:
//!
//! ```text
//! [varint64 N] ([varint64 number][varint64 records_num]
//!               [varint64 invalid_num][varint64 table_size]) * N
//! ```
//!
//! Refcounts are runtime-only and never persisted. The file is rewritten
//! whole via write-temp, fsync, atomic rename, directory fsync. A manifest
//! that fails to decode aborts database open; no partial state is
//! synthesized.
//!
//! # Concurrency
//!
//! Every piece of manager state lives behind one mutex. The GC worker never
//! re-enters the manager: its work list is detached from the state *before*
//! the thread starts, so the state stays consistent even if the worker dies.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::encoding::{get_varint64, put_varint64};
use crate::env::Env;
use crate::filename::{VTABLE_MANAGER_NAME, temp_file_name, vtable_file_name, vtable_manager_file_name};

use super::VTableError;

// ------------------------------------------------------------------------------------------------
// VTableMeta
// ------------------------------------------------------------------------------------------------

/// Per-file metadata tracked by the manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VTableMeta {
    /// File number, shared with the SST namespace.
    pub number: u64,

    /// Total records written at build time.
    pub records_num: u64,

    /// Cumulative invalidations reported by the engine.
    pub invalid_num: u64,

    /// Bytes on disk.
    pub table_size: u64,

    /// Open-reader count. Runtime only, never persisted.
    pub refs: u64,
}

impl VTableMeta {
    /// A file is dead once every record in it has been invalidated.
    pub fn is_dead(&self) -> bool {
        self.invalid_num >= self.records_num
    }

    /// Append the persisted quartet (refs excluded).
    pub fn encode_to(&self, buf: &mut Vec<u8>) {
        put_varint64(buf, self.number);
        put_varint64(buf, self.records_num);
        put_varint64(buf, self.invalid_num);
        put_varint64(buf, self.table_size);
    }

    /// Consume one persisted quartet from the cursor.
    pub fn decode(input: &mut &[u8]) -> Result<Self, VTableError> {
        let number = get_varint64(input)
            .map_err(|e| VTableError::corrupt("vtable meta number", e))?;
        let records_num = get_varint64(input)
            .map_err(|e| VTableError::corrupt("vtable meta records_num", e))?;
        let invalid_num = get_varint64(input)
            .map_err(|e| VTableError::corrupt("vtable meta invalid_num", e))?;
        let table_size = get_varint64(input)
            .map_err(|e| VTableError::corrupt("vtable meta table_size", e))?;
        Ok(Self {
            number,
            records_num,
            invalid_num,
            table_size,
            refs: 0,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// VTableManager
// ------------------------------------------------------------------------------------------------

struct ManagerState {
    /// Authoritative map of live vTables.
    vtables: BTreeMap<u64, VTableMeta>,

    /// File numbers believed dead, pending collection.
    invalid: Vec<u64>,
}

/// Tracks vTable liveness and schedules background deletion of dead files.
pub struct VTableManager {
    dbname: PathBuf,
    env: Arc<dyn Env>,
    gc_threshold: u64,
    state: Mutex<ManagerState>,
}

impl VTableManager {
    /// Create a manager for the database at `dbname`.
    ///
    /// `gc_threshold` is the combined byte size of collectable dead files at
    /// or above which a background unlink pass is scheduled.
    pub fn new(dbname: impl Into<PathBuf>, env: Arc<dyn Env>, gc_threshold: u64) -> Self {
        Self {
            dbname: dbname.into(),
            env,
            gc_threshold,
            state: Mutex::new(ManagerState {
                vtables: BTreeMap::new(),
                invalid: Vec::new(),
            }),
        }
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, ManagerState>, VTableError> {
        self.state
            .lock()
            .map_err(|_| VTableError::Internal("vtable manager mutex poisoned".into()))
    }

    // --------------------------------------------------------------------
    // Registration
    // --------------------------------------------------------------------

    /// Insert or overwrite the entry for `meta.number`.
    pub fn add(&self, meta: VTableMeta) -> Result<(), VTableError> {
        let mut state = self.lock_state()?;
        debug!(
            number = meta.number,
            records = meta.records_num,
            bytes = meta.table_size,
            "registering vtable"
        );
        state.vtables.insert(meta.number, meta);
        Ok(())
    }

    /// Erase the entry for `number` if present. Idempotent.
    pub fn remove(&self, number: u64) -> Result<(), VTableError> {
        let mut state = self.lock_state()?;
        state.vtables.remove(&number);
        Ok(())
    }

    /// Whether the manager still lists `number`.
    ///
    /// Readers use this to detect files scheduled for deletion beneath them.
    pub fn contains(&self, number: u64) -> bool {
        self.state
            .lock()
            .map(|state| state.vtables.contains_key(&number))
            .unwrap_or(false)
    }

    /// Snapshot of the entry for `number`, if present.
    pub fn meta(&self, number: u64) -> Option<VTableMeta> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.vtables.get(&number).cloned())
    }

    /// File numbers currently listed, ascending.
    pub fn live_numbers(&self) -> Result<Vec<u64>, VTableError> {
        Ok(self.lock_state()?.vtables.keys().copied().collect())
    }

    // --------------------------------------------------------------------
    // Invalidation and refcounts
    // --------------------------------------------------------------------

    /// Record that one record of vTable `number` has been superseded or
    /// dropped.
    ///
    /// Fails with corruption if the manager does not list `number`. When the
    /// entry becomes dead it joins the collection candidates, and a GC pass
    /// may be scheduled before returning.
    pub fn add_invalid(&self, number: u64) -> Result<(), VTableError> {
        let mut state = self.lock_state()?;
        let Some(meta) = state.vtables.get_mut(&number) else {
            return Err(VTableError::Corruption(format!(
                "invalidation for unknown vtable {number}"
            )));
        };

        // Saturate at records_num so the dead predicate stays an equality
        // check even if the engine ever double-reports.
        if meta.invalid_num < meta.records_num {
            meta.invalid_num += 1;
        } else {
            debug!(number, "invalidation for already-dead vtable");
        }

        if meta.is_dead() {
            state.invalid.push(number);
        }
        drop(state);

        self.maybe_schedule_gc()
    }

    /// Note an open reader on `number`.
    ///
    /// Fails with corruption if the manager does not list the file.
    pub fn ref_vtable(&self, number: u64) -> Result<(), VTableError> {
        let mut state = self.lock_state()?;
        let Some(meta) = state.vtables.get_mut(&number) else {
            return Err(VTableError::Corruption(format!(
                "reference to unknown vtable {number}"
            )));
        };
        meta.refs += 1;
        Ok(())
    }

    /// Note a closed reader on `number`.
    ///
    /// Tolerates a missing entry: the engine may have removed the file's
    /// metadata while a reader was still draining.
    pub fn unref_vtable(&self, number: u64) -> Result<(), VTableError> {
        let mut state = self.lock_state()?;
        match state.vtables.get_mut(&number) {
            Some(meta) if meta.refs > 0 => meta.refs -= 1,
            Some(_) => warn!(number, "unref of vtable with zero refs"),
            None => warn!(number, "unref of unlisted vtable"),
        }
        Ok(())
    }

    // --------------------------------------------------------------------
    // Garbage collection
    // --------------------------------------------------------------------

    /// Schedule a background unlink pass if enough dead, unreferenced bytes
    /// have accumulated.
    ///
    /// The candidate list is deduplicated; entries still referenced stay
    /// behind for a later pass. Scheduled entries are detached from the
    /// manager state *before* the worker thread starts, so the worker never
    /// touches shared state. Returns immediately; unlink errors inside the
    /// worker are logged, never surfaced.
    pub fn maybe_schedule_gc(&self) -> Result<(), VTableError> {
        let mut state = self.lock_state()?;

        state.invalid.sort_unstable();
        state.invalid.dedup();
        // Drop candidates whose metadata is already gone.
        let ManagerState { vtables, invalid } = &mut *state;
        invalid.retain(|n| vtables.contains_key(n));

        let collectable: Vec<u64> = invalid
            .iter()
            .copied()
            .filter(|n| {
                vtables
                    .get(n)
                    .is_some_and(|meta| meta.is_dead() && meta.refs == 0)
            })
            .collect();

        let total_bytes: u64 = collectable
            .iter()
            .filter_map(|n| vtables.get(n).map(|meta| meta.table_size))
            .sum();

        if collectable.is_empty() || total_bytes < self.gc_threshold {
            return Ok(());
        }

        for number in &collectable {
            vtables.remove(number);
        }
        invalid.retain(|n| !collectable.contains(n));
        drop(state);

        info!(
            files = ?collectable,
            total_bytes,
            "scheduling vtable garbage collection"
        );

        let dbname = self.dbname.clone();
        let env = Arc::clone(&self.env);
        let worker_env = Arc::clone(&self.env);
        worker_env.start_thread(Box::new(move || {
            for number in collectable {
                let path = vtable_file_name(&dbname, number);
                match env.remove_file(&path) {
                    Ok(()) => info!(number, "garbage-collected vtable"),
                    Err(e) => warn!(number, error = %e, "failed to unlink dead vtable"),
                }
            }
        }));

        Ok(())
    }

    // --------------------------------------------------------------------
    // Persistence
    // --------------------------------------------------------------------

    /// Persist the full table to `VTABLEMETA`, atomically.
    pub fn save(&self) -> Result<(), VTableError> {
        let mut payload = Vec::new();
        {
            let state = self.lock_state()?;
            put_varint64(&mut payload, state.vtables.len() as u64);
            for meta in state.vtables.values() {
                meta.encode_to(&mut payload);
            }
        }

        let tmp_path = temp_file_name(&self.dbname, VTABLE_MANAGER_NAME);
        let final_path = vtable_manager_file_name(&self.dbname);

        let mut file = self.env.new_writable_file(&tmp_path)?;
        file.append(&payload)?;
        file.flush()?;
        file.sync()?;
        file.close()?;

        self.env.rename_file(&tmp_path, &final_path)?;
        self.env.sync_dir(&self.dbname)?;

        info!(path = %final_path.display(), "vtable manifest saved");
        Ok(())
    }

    /// Load the persisted table on startup.
    ///
    /// An absent manifest starts the manager empty. Entries with file
    /// number 0 are skipped; dead entries rejoin the collection candidates.
    /// A manifest that fails to decode is corruption — the caller aborts
    /// database open.
    pub fn load(&self) -> Result<(), VTableError> {
        let path = vtable_manager_file_name(&self.dbname);
        if !self.env.file_exists(&path) {
            return Ok(());
        }

        let mut file = self.env.new_sequential_file(&path)?;
        let payload = file.read_to_end()?;
        let mut input = payload.as_slice();

        let count = get_varint64(&mut input)
            .map_err(|e| VTableError::corrupt("vtable manifest count", e))?;

        let mut state = self.lock_state()?;
        for _ in 0..count {
            let meta = VTableMeta::decode(&mut input)?;
            if meta.number == 0 {
                continue;
            }
            if meta.is_dead() {
                state.invalid.push(meta.number);
            }
            state.vtables.insert(meta.number, meta);
        }

        info!(
            vtables = state.vtables.len(),
            dead = state.invalid.len(),
            "vtable manifest loaded"
        );
        Ok(())
    }
}
