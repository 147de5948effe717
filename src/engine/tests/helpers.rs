use std::path::Path;
use std::time::{Duration, Instant};

use tracing::Level;
use tracing_subscriber::fmt::Subscriber;

use crate::engine::{Db, DbConfig};
use crate::env::DiskEnv;

pub fn init_tracing() {
    let _ = Subscriber::builder()
        .with_max_level(Level::TRACE)
        .try_init();
}

pub fn open_db(path: &Path, kv_sep_size: usize, gc_threshold: u64) -> Db {
    Db::open(
        path,
        DbConfig {
            kv_sep_size,
            gc_threshold,
            env: DiskEnv::shared(),
        },
    )
    .expect("open db")
}

/// Spin until `cond` holds or five seconds pass; background GC runs on a
/// detached thread.
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
