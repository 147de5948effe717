use std::io;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tracing::Level;
use tracing_subscriber::fmt::Subscriber;

use crate::env::{DiskEnv, Env, WritableFile};

pub fn init_tracing() {
    let _ = Subscriber::builder()
        .with_max_level(Level::TRACE)
        .try_init();
}

/// Spin until `cond` holds or five seconds pass. Background GC runs on a
/// detached thread, so tests observe its effects with a bounded wait.
pub fn wait_until(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// Environment whose writable files start failing after a set number of
/// appends. Everything else delegates to [`DiskEnv`].
pub struct FailingWriteEnv {
    inner: DiskEnv,
    appends_before_failure: usize,
}

impl FailingWriteEnv {
    pub fn new(appends_before_failure: usize) -> Arc<dyn Env> {
        Arc::new(Self {
            inner: DiskEnv,
            appends_before_failure,
        })
    }
}

struct FailingWritableFile {
    inner: Box<dyn WritableFile>,
    remaining: AtomicUsize,
}

impl WritableFile for FailingWritableFile {
    fn append(&mut self, data: &[u8]) -> io::Result<()> {
        if self.remaining.load(Ordering::Relaxed) == 0 {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "injected write failure"));
        }
        self.remaining.fetch_sub(1, Ordering::Relaxed);
        self.inner.append(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    fn sync(&mut self) -> io::Result<()> {
        self.inner.sync()
    }

    fn close(&mut self) -> io::Result<()> {
        self.inner.close()
    }
}

impl Env for FailingWriteEnv {
    fn new_writable_file(&self, path: &Path) -> io::Result<Box<dyn WritableFile>> {
        Ok(Box::new(FailingWritableFile {
            inner: self.inner.new_writable_file(path)?,
            remaining: AtomicUsize::new(self.appends_before_failure),
        }))
    }

    fn new_sequential_file(
        &self,
        path: &Path,
    ) -> io::Result<Box<dyn crate::env::SequentialFile>> {
        self.inner.new_sequential_file(path)
    }

    fn new_random_access_file(
        &self,
        path: &Path,
    ) -> io::Result<Arc<dyn crate::env::RandomAccessFile>> {
        self.inner.new_random_access_file(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.inner.remove_file(path)
    }

    fn rename_file(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.inner.rename_file(from, to)
    }

    fn file_exists(&self, path: &Path) -> bool {
        self.inner.file_exists(path)
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        self.inner.file_size(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.inner.create_dir_all(path)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<std::path::PathBuf>> {
        self.inner.list_dir(path)
    }

    fn sync_dir(&self, path: &Path) -> io::Result<()> {
        self.inner.sync_dir(path)
    }

    fn start_thread(&self, work: Box<dyn FnOnce() + Send + 'static>) {
        self.inner.start_thread(work)
    }
}
