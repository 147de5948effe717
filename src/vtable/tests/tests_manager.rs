use tempfile::TempDir;

use crate::encoding::put_varint64;
use crate::env::{DiskEnv, Env};
use crate::filename::vtable_manager_file_name;
use crate::vtable::{VTableError, VTableManager, VTableMeta};

use super::helpers::init_tracing;

fn meta(number: u64, records_num: u64, table_size: u64) -> VTableMeta {
    VTableMeta {
        number,
        records_num,
        invalid_num: 0,
        table_size,
        refs: 0,
    }
}

fn new_manager(dir: &std::path::Path, gc_threshold: u64) -> VTableManager {
    VTableManager::new(dir, DiskEnv::shared(), gc_threshold)
}

#[test]
fn test_add_overwrite_remove() {
    let tmp = TempDir::new().unwrap();
    let manager = new_manager(tmp.path(), 1 << 20);

    manager.add(meta(1, 10, 1000)).unwrap();
    assert!(manager.contains(1));
    assert_eq!(manager.meta(1).unwrap().records_num, 10);

    // add overwrites an existing entry wholesale.
    manager.add(meta(1, 20, 2000)).unwrap();
    assert_eq!(manager.meta(1).unwrap().records_num, 20);

    manager.remove(1).unwrap();
    assert!(!manager.contains(1));

    // remove is idempotent.
    manager.remove(1).unwrap();
}

#[test]
fn test_add_invalid_unknown_number_is_corruption() {
    let tmp = TempDir::new().unwrap();
    let manager = new_manager(tmp.path(), 1 << 20);

    assert!(matches!(
        manager.add_invalid(99),
        Err(VTableError::Corruption(_))
    ));
}

#[test]
fn test_add_invalid_counts_up_to_records_num() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let manager = new_manager(tmp.path(), 1 << 20);
    manager.add(meta(1, 3, 100)).unwrap();

    manager.add_invalid(1).unwrap();
    assert_eq!(manager.meta(1).unwrap().invalid_num, 1);
    assert!(!manager.meta(1).unwrap().is_dead());

    manager.add_invalid(1).unwrap();
    manager.add_invalid(1).unwrap();
    let m = manager.meta(1).unwrap();
    assert_eq!(m.invalid_num, 3);
    assert!(m.is_dead());

    // A spurious extra report never pushes invalid_num past records_num.
    manager.add_invalid(1).unwrap();
    let m = manager.meta(1).unwrap();
    assert_eq!(m.invalid_num, m.records_num);
}

#[test]
fn test_refs_track_open_readers() {
    let tmp = TempDir::new().unwrap();
    let manager = new_manager(tmp.path(), 1 << 20);
    manager.add(meta(1, 1, 100)).unwrap();

    manager.ref_vtable(1).unwrap();
    manager.ref_vtable(1).unwrap();
    assert_eq!(manager.meta(1).unwrap().refs, 2);

    manager.unref_vtable(1).unwrap();
    assert_eq!(manager.meta(1).unwrap().refs, 1);

    assert!(matches!(
        manager.ref_vtable(42),
        Err(VTableError::Corruption(_))
    ));
    // unref tolerates an entry the engine already dropped.
    manager.unref_vtable(42).unwrap();
}

#[test]
fn test_save_load_round_trip() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let manager = new_manager(tmp.path(), 1 << 20);

    manager.add(meta(1, 10, 1000)).unwrap();
    manager.add(meta(2, 5, 500)).unwrap();
    manager.add(meta(7, 1, 42)).unwrap();
    manager.add_invalid(2).unwrap();
    manager.ref_vtable(1).unwrap();

    manager.save().unwrap();

    let recovered = new_manager(tmp.path(), 1 << 20);
    recovered.load().unwrap();

    assert_eq!(recovered.live_numbers().unwrap(), vec![1, 2, 7]);
    for number in [1u64, 2, 7] {
        let before = manager.meta(number).unwrap();
        let after = recovered.meta(number).unwrap();
        assert_eq!(after.records_num, before.records_num);
        assert_eq!(after.invalid_num, before.invalid_num);
        assert_eq!(after.table_size, before.table_size);
        // Refs are runtime state and never persisted.
        assert_eq!(after.refs, 0);
    }
}

#[test]
fn test_load_missing_manifest_starts_empty() {
    let tmp = TempDir::new().unwrap();
    let manager = new_manager(tmp.path(), 1 << 20);
    manager.load().unwrap();
    assert!(manager.live_numbers().unwrap().is_empty());
}

#[test]
fn test_load_skips_number_zero_entries() {
    let tmp = TempDir::new().unwrap();
    let env = DiskEnv::shared();

    // Handcraft a manifest holding entries 0 and 3.
    let mut payload = Vec::new();
    put_varint64(&mut payload, 2);
    for (number, records, invalid, size) in [(0u64, 4u64, 0u64, 400u64), (3, 4, 0, 400)] {
        put_varint64(&mut payload, number);
        put_varint64(&mut payload, records);
        put_varint64(&mut payload, invalid);
        put_varint64(&mut payload, size);
    }
    let path = vtable_manager_file_name(tmp.path());
    let mut file = env.new_writable_file(&path).unwrap();
    file.append(&payload).unwrap();
    file.sync().unwrap();
    file.close().unwrap();

    let manager = VTableManager::new(tmp.path(), env, 1 << 20);
    manager.load().unwrap();
    assert_eq!(manager.live_numbers().unwrap(), vec![3]);
}

#[test]
fn test_load_dead_entries_rejoin_candidates() {
    let tmp = TempDir::new().unwrap();

    // Persist a dead entry with gc_threshold 0, then reload into a fresh
    // manager: the first manual GC pass must collect it.
    let env = DiskEnv::shared();
    let vtb_path = crate::filename::vtable_file_name(tmp.path(), 5);
    let mut file = env.new_writable_file(&vtb_path).unwrap();
    file.append(&[0u8; 64]).unwrap();
    file.sync().unwrap();
    file.close().unwrap();

    let manager = new_manager(tmp.path(), 0);
    manager
        .add(VTableMeta {
            number: 5,
            records_num: 2,
            invalid_num: 2,
            table_size: 64,
            refs: 0,
        })
        .unwrap();
    manager.save().unwrap();

    let recovered = new_manager(tmp.path(), 0);
    recovered.load().unwrap();
    recovered.maybe_schedule_gc().unwrap();

    assert!(!recovered.contains(5));
    assert!(super::helpers::wait_until(|| !vtb_path.exists()));
}

#[test]
fn test_load_corrupt_manifest_fails() {
    let tmp = TempDir::new().unwrap();
    let env = DiskEnv::shared();

    // Count says two entries, payload holds half of one.
    let mut payload = Vec::new();
    put_varint64(&mut payload, 2);
    put_varint64(&mut payload, 1);

    let path = vtable_manager_file_name(tmp.path());
    let mut file = env.new_writable_file(&path).unwrap();
    file.append(&payload).unwrap();
    file.sync().unwrap();
    file.close().unwrap();

    let manager = VTableManager::new(tmp.path(), env, 1 << 20);
    assert!(matches!(
        manager.load(),
        Err(VTableError::Corruption(_))
    ));
}
