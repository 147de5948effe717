use tempfile::TempDir;

use crate::encoding::varint64_len;
use crate::env::{DiskEnv, Env};
use crate::vtable::format::{RECORD_HEADER_SIZE, VTableRecord};
use crate::vtable::{VTableBuilder, VTableError};

use super::helpers::{FailingWriteEnv, init_tracing};

fn record(key: &[u8], value: &[u8]) -> VTableRecord {
    VTableRecord {
        key: key.to_vec(),
        value: value.to_vec(),
    }
}

fn framed_len(rec: &VTableRecord) -> u64 {
    (RECORD_HEADER_SIZE + varint64_len(rec.key.len() as u64) + rec.key.len() + rec.value.len())
        as u64
}

#[test]
fn test_handles_are_prefix_sums() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    let env = DiskEnv;
    let path = tmp.path().join("000001.vtb");

    let records = [
        record(b"a", b"first"),
        record(b"bb", &vec![0x5au8; 777]),
        record(b"ccc", b""),
        record(b"", b"keyless"),
    ];

    let mut builder = VTableBuilder::new(env.new_writable_file(&path).unwrap());
    let mut expected_offset = 0u64;
    for rec in &records {
        let handle = builder.add(rec).unwrap();
        assert_eq!(handle.offset, expected_offset);
        assert_eq!(handle.size, framed_len(rec));
        expected_offset += handle.size;
    }

    assert_eq!(builder.records_written(), records.len() as u64);
    assert_eq!(builder.file_size(), expected_offset);
    builder.finish().unwrap();

    let mut file = builder.into_file();
    file.sync().unwrap();
    file.close().unwrap();

    assert_eq!(env.file_size(&path).unwrap(), expected_offset);
}

#[test]
fn test_empty_record_handle_is_five_bytes() {
    let tmp = TempDir::new().unwrap();
    let env = DiskEnv;
    let path = tmp.path().join("000002.vtb");

    let mut builder = VTableBuilder::new(env.new_writable_file(&path).unwrap());
    let handle = builder.add(&record(b"", b"")).unwrap();
    assert_eq!(handle.offset, 0);
    assert_eq!(handle.size, 5);
}

#[test]
fn test_first_error_latches() {
    init_tracing();

    let tmp = TempDir::new().unwrap();
    // The first add issues two appends (header, body); allow one so the
    // body write fails mid-record.
    let env = FailingWriteEnv::new(1);
    let path = tmp.path().join("000003.vtb");

    let mut builder = VTableBuilder::new(env.new_writable_file(&path).unwrap());
    assert!(builder.status().is_ok());

    let first = builder.add(&record(b"k1", b"v1")).unwrap_err();
    assert!(matches!(first, VTableError::Io(_)));

    let size_after_failure = builder.file_size();
    let records_after_failure = builder.records_written();

    // Subsequent adds are silent no-ops returning the latched error.
    let second = builder.add(&record(b"k2", b"v2")).unwrap_err();
    assert_eq!(second, first);
    assert_eq!(builder.file_size(), size_after_failure);
    assert_eq!(builder.records_written(), records_after_failure);

    assert_eq!(builder.status().unwrap_err(), first);
    assert_eq!(builder.finish().unwrap_err(), first);

    builder.abandon();
}

#[test]
fn test_failed_add_does_not_advance_offset() {
    let tmp = TempDir::new().unwrap();
    // Three appends succeed: record one (header+body) and record two's
    // header; record two's body write fails.
    let env = FailingWriteEnv::new(3);
    let path = tmp.path().join("000004.vtb");

    let mut builder = VTableBuilder::new(env.new_writable_file(&path).unwrap());
    let ok = builder.add(&record(b"k1", b"v1")).unwrap();
    assert!(builder.add(&record(b"k2", b"v2")).is_err());

    assert_eq!(builder.file_size(), ok.size);
    assert_eq!(builder.records_written(), 1);
}
