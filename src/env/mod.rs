//! Pluggable environment — filesystem access and thread spawning.
//!
//! Every byte vellumdb reads or writes goes through the [`Env`] trait, and
//! the one background worker the store owns (vTable garbage collection) is
//! spawned through it too. Keeping this seam explicit buys two things:
//!
//! - **Testability** — tests inject failing or counting implementations to
//!   exercise error paths that a real filesystem rarely produces.
//! - **Portability** — the production [`DiskEnv`] is ordinary `std::fs`
//!   plus a memory-mapped read path; an alternative environment can swap in
//!   object storage or an in-memory filesystem without touching the engine.
//!
//! All I/O is synchronous and blocking. Errors are plain [`io::Error`]s and
//! are translated into richer error types by the calling layer.


use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use memmap2::Mmap;

// ------------------------------------------------------------------------------------------------
// File traits
// ------------------------------------------------------------------------------------------------

/// An append-only file being written sequentially.
///
/// Callers drive the durability sequence explicitly: `append` stages bytes,
/// `flush` pushes them to the OS, `sync` makes them durable, `close` ends the
/// file's life. Each step may fail independently so callers can order
/// durability across multiple files.
pub trait WritableFile: Send {
    /// Append `data` at the current end of the file.
    fn append(&mut self, data: &[u8]) -> io::Result<()>;

    /// Push buffered bytes to the operating system.
    fn flush(&mut self) -> io::Result<()>;

    /// Force written bytes to stable storage.
    fn sync(&mut self) -> io::Result<()>;

    /// Close the file. Further calls on the handle fail.
    fn close(&mut self) -> io::Result<()>;
}

/// A file read once, front to back.
pub trait SequentialFile: Send {
    /// Read the remainder of the file into memory.
    fn read_to_end(&mut self) -> io::Result<Vec<u8>>;
}

/// An immutable file supporting positioned reads from any thread.
pub trait RandomAccessFile: Send + Sync {
    /// Read up to `len` bytes starting at `offset`.
    ///
    /// A read past the end of the file returns the bytes that exist; the
    /// caller detects truncation by comparing lengths.
    fn read(&self, offset: u64, len: usize) -> io::Result<Vec<u8>>;

    /// Total file length in bytes.
    fn len(&self) -> u64;
}

// ------------------------------------------------------------------------------------------------
// Env trait
// ------------------------------------------------------------------------------------------------

/// Access to the host filesystem and thread primitive.
pub trait Env: Send + Sync {
    /// Create (truncating) a file for sequential writing.
    fn new_writable_file(&self, path: &Path) -> io::Result<Box<dyn WritableFile>>;

    /// Open an existing file for one front-to-back read.
    fn new_sequential_file(&self, path: &Path) -> io::Result<Box<dyn SequentialFile>>;

    /// Open an existing file for positioned reads.
    fn new_random_access_file(&self, path: &Path) -> io::Result<Arc<dyn RandomAccessFile>>;

    /// Delete a file.
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Atomically rename `from` to `to`, replacing any existing `to`.
    fn rename_file(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Whether `path` names an existing file.
    fn file_exists(&self, path: &Path) -> bool;

    /// Size of the file at `path` in bytes.
    fn file_size(&self, path: &Path) -> io::Result<u64>;

    /// Create `path` and any missing parents.
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// List the entries of a directory.
    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Fsync a directory so renames within it are durable.
    fn sync_dir(&self, path: &Path) -> io::Result<()>;

    /// Run `work` on a detached background thread.
    fn start_thread(&self, work: Box<dyn FnOnce() + Send + 'static>);
}

// ------------------------------------------------------------------------------------------------
// DiskEnv — the production environment
// ------------------------------------------------------------------------------------------------

/// Production [`Env`] backed by the local filesystem.
///
/// Writable files buffer through [`BufWriter`]; random-access files are
/// memory-mapped so concurrent positioned reads need no seek coordination.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskEnv;

impl DiskEnv {
    /// Shared handle to the process-wide disk environment.
    pub fn shared() -> Arc<dyn Env> {
        Arc::new(DiskEnv)
    }
}

struct DiskWritableFile {
    // `None` after close.
    inner: Option<BufWriter<File>>,
}

impl DiskWritableFile {
    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "file already closed"))
    }
}

impl WritableFile for DiskWritableFile {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer()?.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer()?.flush()
    }

    fn sync(&mut self) -> io::Result<()> {
        let writer = self.writer()?;
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(mut writer) = self.inner.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

struct DiskSequentialFile {
    file: File,
}

impl SequentialFile for DiskSequentialFile {
    fn read_to_end(&mut self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

struct MmapReadableFile {
    // `None` for zero-length files, which cannot be mapped portably.
    map: Option<Mmap>,
    len: u64,
}

impl RandomAccessFile for MmapReadableFile {
    fn read(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let Some(map) = &self.map else {
            return Ok(Vec::new());
        };
        if offset >= self.len {
            return Ok(Vec::new());
        }
        let start = offset as usize;
        let end = start.saturating_add(len).min(map.len());
        Ok(map[start..end].to_vec())
    }

    fn len(&self) -> u64 {
        self.len
    }
}

impl Env for DiskEnv {
    fn new_writable_file(&self, path: &Path) -> io::Result<Box<dyn WritableFile>> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Box::new(DiskWritableFile {
            inner: Some(BufWriter::new(file)),
        }))
    }

    fn new_sequential_file(&self, path: &Path) -> io::Result<Box<dyn SequentialFile>> {
        Ok(Box::new(DiskSequentialFile {
            file: File::open(path)?,
        }))
    }

    fn new_random_access_file(&self, path: &Path) -> io::Result<Arc<dyn RandomAccessFile>> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        let map = if len == 0 {
            None
        } else {
            // SAFETY: vellumdb files are immutable once opened for reading;
            // writers never touch a file after it has been published.
            Some(unsafe { Mmap::map(&file)? })
        };
        Ok(Arc::new(MmapReadableFile { map, len }))
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn rename_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn file_exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(path)?.len())
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path)? {
            entries.push(entry?.path());
        }
        Ok(entries)
    }

    fn sync_dir(&self, path: &Path) -> io::Result<()> {
        File::open(path)?.sync_all()
    }

    fn start_thread(&self, work: Box<dyn FnOnce() + Send + 'static>) {
        thread::spawn(work);
    }
}
