//! Random-access resolution of a vTable handle back to its record.

use std::path::Path;
use std::sync::Arc;

use crate::env::{Env, RandomAccessFile};

use super::VTableError;
use super::format::{RECORD_HEADER_SIZE, RecordDecoder, VTableHandle, VTableRecord};
use super::manager::VTableManager;

/// Reads individual records out of one vTable file.
///
/// A managed reader participates in the manager's refcounting: the file is
/// referenced for the reader's whole lifetime, which blocks garbage
/// collection of the file while reads are in flight. If the manager stops
/// listing the file anyway (the engine dropped its metadata), reads fail
/// with the soft [`VTableError::Timeout`] so callers can retry against a
/// fresher version.
pub struct VTableReader {
    file: Arc<dyn RandomAccessFile>,
    binding: Option<ManagerBinding>,
}

struct ManagerBinding {
    file_number: u64,
    manager: Arc<VTableManager>,
}

impl VTableReader {
    /// Open `path` without manager coordination.
    ///
    /// Used by tooling and tests that inspect a vTable in isolation.
    pub fn open(env: &Arc<dyn Env>, path: &Path) -> Result<Self, VTableError> {
        Ok(Self {
            file: env.new_random_access_file(path)?,
            binding: None,
        })
    }

    /// Open `path` as vTable `file_number`, holding a reference in
    /// `manager` until the reader is dropped.
    pub fn open_managed(
        env: &Arc<dyn Env>,
        path: &Path,
        file_number: u64,
        manager: Arc<VTableManager>,
    ) -> Result<Self, VTableError> {
        manager.ref_vtable(file_number)?;
        let file = match env.new_random_access_file(path) {
            Ok(file) => file,
            Err(e) => {
                // Balance the reference taken above before surfacing.
                let _ = manager.unref_vtable(file_number);
                return Err(e.into());
            }
        };
        Ok(Self {
            file,
            binding: Some(ManagerBinding {
                file_number,
                manager,
            }),
        })
    }

    /// Read and decode the record at `handle`.
    ///
    /// Reads exactly `handle.size` bytes at `handle.offset`. A short read
    /// or any framing mismatch is corruption; a file the manager no longer
    /// lists is a retryable timeout.
    pub fn get(&self, handle: &VTableHandle) -> Result<VTableRecord, VTableError> {
        if let Some(binding) = &self.binding
            && !binding.manager.contains(binding.file_number)
        {
            return Err(VTableError::Timeout(format!(
                "vtable {} no longer listed by manager",
                binding.file_number
            )));
        }

        let buf = self.file.read(handle.offset, handle.size as usize)?;
        if buf.len() as u64 != handle.size {
            return Err(VTableError::Corruption(format!(
                "read {} bytes, handle says {}",
                buf.len(),
                handle.size
            )));
        }

        let mut input = buf.as_slice();
        let mut decoder = RecordDecoder::new();
        decoder.decode_header(&mut input)?;
        if u64::from(decoder.record_size()) + RECORD_HEADER_SIZE as u64 != handle.size {
            return Err(VTableError::Corruption(format!(
                "record header announces {} body bytes, handle spans {}",
                decoder.record_size(),
                handle.size
            )));
        }
        decoder.decode_record(&mut input)
    }

    /// Drop the file handle and release the manager reference.
    pub fn close(self) {}
}

impl Drop for VTableReader {
    fn drop(&mut self) {
        if let Some(binding) = self.binding.take() {
            let _ = binding.manager.unref_vtable(binding.file_number);
        }
    }
}
