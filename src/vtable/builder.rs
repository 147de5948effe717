//! Sequential construction of one vTable file.

use crate::env::WritableFile;

use super::VTableError;
use super::format::{RecordEncoder, VTableHandle, VTableRecord};

/// Appends encoded records to one append-only vTable file.
///
/// Records land in the order [`add`](VTableBuilder::add) is called, which is
/// the order the flush iterator yields them — key-ascending under the host
/// comparator. The builder never reorders or compacts.
///
/// # Error policy
///
/// The first failure latches: every later `add` is a silent no-op that
/// returns the latched error, and [`status`](VTableBuilder::status) keeps
/// reporting it. The caller abandons the builder and unlinks the file.
pub struct VTableBuilder {
    file: Box<dyn WritableFile>,
    encoder: RecordEncoder,
    file_size: u64,
    records_written: u64,
    status: Result<(), VTableError>,
}

impl VTableBuilder {
    /// Start building into `file`, which must be empty.
    pub fn new(file: Box<dyn WritableFile>) -> Self {
        Self {
            file,
            encoder: RecordEncoder::new(),
            file_size: 0,
            records_written: 0,
            status: Ok(()),
        }
    }

    /// Append one record, returning the handle that locates it.
    pub fn add(&mut self, record: &VTableRecord) -> Result<VTableHandle, VTableError> {
        if let Err(e) = &self.status {
            return Err(e.clone());
        }
        match self.append_record(record) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.status = Err(e.clone());
                Err(e)
            }
        }
    }

    fn append_record(&mut self, record: &VTableRecord) -> Result<VTableHandle, VTableError> {
        self.encoder.encode(record)?;

        let handle = VTableHandle {
            offset: self.file_size,
            size: self.encoder.encoded_size(),
        };

        self.file.append(self.encoder.header())?;
        self.file.append(self.encoder.body())?;

        self.file_size += self.encoder.encoded_size();
        self.records_written += 1;
        Ok(handle)
    }

    /// Flush the underlying file.
    ///
    /// Sync and close stay with the caller so it can order SST and vTable
    /// durability.
    pub fn finish(&mut self) -> Result<(), VTableError> {
        if let Err(e) = &self.status {
            return Err(e.clone());
        }
        if let Err(e) = self.file.flush() {
            let err = VTableError::from(e);
            self.status = Err(err.clone());
            return Err(err);
        }
        Ok(())
    }

    /// Discard the builder. The caller unlinks the half-written file.
    pub fn abandon(self) {}

    /// First error encountered, if any.
    pub fn status(&self) -> Result<(), VTableError> {
        self.status.clone()
    }

    /// Bytes appended so far.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Records appended so far.
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Give the file back so the caller can sync and close it.
    pub fn into_file(self) -> Box<dyn WritableFile> {
        self.file
    }
}
