use std::sync::Arc;

use tempfile::TempDir;

use crate::env::{DiskEnv, Env};
use crate::filename::vtable_file_name;
use crate::vtable::{VTableManager, VTableMeta};

use super::helpers::{init_tracing, wait_until};

/// Drop a synthetic vTable file of `size` bytes into the database directory.
fn write_vtable_file(env: &Arc<dyn Env>, dir: &std::path::Path, number: u64, size: usize) {
    let mut file = env
        .new_writable_file(&vtable_file_name(dir, number))
        .unwrap();
    file.append(&vec![0u8; size]).unwrap();
    file.sync().unwrap();
    file.close().unwrap();
}

fn register(manager: &VTableManager, number: u64, records_num: u64, table_size: u64) {
    manager
        .add(VTableMeta {
            number,
            records_num,
            invalid_num: 0,
            table_size,
            refs: 0,
        })
        .unwrap();
}

#[test]
fn test_zero_threshold_collects_on_first_death() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let env = DiskEnv::shared();
    write_vtable_file(&env, tmp.path(), 1, 64);

    let manager = VTableManager::new(tmp.path(), env, 0);
    register(&manager, 1, 1, 64);

    // One invalidation kills the single-record file and, with a zero
    // threshold, collection fires immediately.
    manager.add_invalid(1).unwrap();

    assert!(!manager.contains(1));
    let path = vtable_file_name(tmp.path(), 1);
    assert!(wait_until(|| !path.exists()));
}

#[test]
fn test_below_threshold_keeps_dead_files() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let env = DiskEnv::shared();
    write_vtable_file(&env, tmp.path(), 1, 64);

    let manager = VTableManager::new(tmp.path(), env, 1 << 20);
    register(&manager, 1, 1, 64);

    manager.add_invalid(1).unwrap();

    // Dead but far below the 1 MiB threshold: nothing is collected.
    assert!(manager.contains(1));
    assert!(manager.meta(1).unwrap().is_dead());
    assert!(vtable_file_name(tmp.path(), 1).exists());
}

#[test]
fn test_dead_sizes_aggregate_across_files() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let env = DiskEnv::shared();
    write_vtable_file(&env, tmp.path(), 1, 600);
    write_vtable_file(&env, tmp.path(), 2, 600);

    let manager = VTableManager::new(tmp.path(), Arc::clone(&env), 1024);
    register(&manager, 1, 1, 600);
    register(&manager, 2, 1, 600);

    // First death: 600 bytes dead, below the 1024 threshold.
    manager.add_invalid(1).unwrap();
    assert!(manager.contains(1));

    // Second death: 1200 bytes dead, both files go in one batch.
    manager.add_invalid(2).unwrap();
    assert!(!manager.contains(1));
    assert!(!manager.contains(2));

    let p1 = vtable_file_name(tmp.path(), 1);
    let p2 = vtable_file_name(tmp.path(), 2);
    assert!(wait_until(|| !p1.exists() && !p2.exists()));
}

#[test]
fn test_referenced_file_survives_gc() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let env = DiskEnv::shared();
    write_vtable_file(&env, tmp.path(), 1, 64);

    let manager = VTableManager::new(tmp.path(), env, 0);
    register(&manager, 1, 1, 64);

    // A reader holds the file open across the death of its last record.
    manager.ref_vtable(1).unwrap();
    manager.add_invalid(1).unwrap();

    assert!(manager.contains(1));
    assert!(vtable_file_name(tmp.path(), 1).exists());

    // Repeated manual triggers change nothing while the reference lives.
    manager.maybe_schedule_gc().unwrap();
    assert!(manager.contains(1));

    // Once the reader closes, the next trigger collects the file.
    manager.unref_vtable(1).unwrap();
    manager.maybe_schedule_gc().unwrap();

    assert!(!manager.contains(1));
    let path = vtable_file_name(tmp.path(), 1);
    assert!(wait_until(|| !path.exists()));
}

#[test]
fn test_live_files_never_collected() {
    let tmp = TempDir::new().unwrap();
    let env = DiskEnv::shared();
    write_vtable_file(&env, tmp.path(), 1, 64);
    write_vtable_file(&env, tmp.path(), 2, 64);

    let manager = VTableManager::new(tmp.path(), env, 0);
    register(&manager, 1, 2, 64);
    register(&manager, 2, 1, 64);

    // File 1 is half-invalidated (still live), file 2 dies.
    manager.add_invalid(1).unwrap();
    manager.add_invalid(2).unwrap();

    assert!(manager.contains(1));
    assert!(!manager.contains(2));
    assert!(vtable_file_name(tmp.path(), 1).exists());
    let p2 = vtable_file_name(tmp.path(), 2);
    assert!(wait_until(|| !p2.exists()));
}

#[test]
fn test_missing_file_is_logged_not_fatal() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    // No file on disk for number 1: the worker's unlink fails, which is
    // swallowed; manager state is already consistent.
    let manager = VTableManager::new(tmp.path(), DiskEnv::shared(), 0);
    register(&manager, 1, 1, 64);

    manager.add_invalid(1).unwrap();
    assert!(!manager.contains(1));
}
