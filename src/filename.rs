//! File naming inside a database directory.
//!
//! All files live flat under the database directory:
//!
//! | name           | contents                                  |
//! |----------------|-------------------------------------------|
//! | `NNNNNN.ldb`   | SSTable                                   |
//! | `NNNNNN.vtb`   | vTable (separated value records)          |
//! | `VTABLEMETA`   | vTable manager manifest                   |
//!
//! SSTables and vTables share one file-number namespace: the SST produced by
//! a flush and the vTable holding its separated values carry the same number.

use std::path::{Path, PathBuf};

/// Extension used by SSTable files.
pub const TABLE_EXT: &str = "ldb";

/// Extension used by vTable files.
pub const VTABLE_EXT: &str = "vtb";

/// Name of the vTable manager manifest file.
pub const VTABLE_MANAGER_NAME: &str = "VTABLEMETA";

/// Kind of a numbered database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// An SSTable (`.ldb`).
    Table,
    /// A vTable (`.vtb`).
    VTable,
}

/// Path of the SSTable with the given file number.
pub fn table_file_name(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("{number:06}.{TABLE_EXT}"))
}

/// Path of the vTable with the given file number.
pub fn vtable_file_name(dbname: &Path, number: u64) -> PathBuf {
    dbname.join(format!("{number:06}.{VTABLE_EXT}"))
}

/// Path of the vTable manager manifest.
pub fn vtable_manager_file_name(dbname: &Path) -> PathBuf {
    dbname.join(VTABLE_MANAGER_NAME)
}

/// Scratch path used while atomically rewriting `name`.
pub fn temp_file_name(dbname: &Path, name: &str) -> PathBuf {
    dbname.join(format!("{name}.tmp"))
}

/// Classify a path inside the database directory.
///
/// Returns `None` for anything that is not a numbered table or vTable file.
pub fn parse_file_name(path: &Path) -> Option<(FileKind, u64)> {
    let stem = path.file_stem()?.to_str()?;
    let number: u64 = stem.parse().ok()?;
    match path.extension()?.to_str()? {
        TABLE_EXT => Some((FileKind::Table, number)),
        VTABLE_EXT => Some((FileKind::VTable, number)),
        _ => None,
    }
}
