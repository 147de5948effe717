//! Micro-benchmarks: write and point-read throughput on both storage
//! paths — inline values and values separated into vTables.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tempfile::TempDir;

use vellumdb::engine::{Db, DbConfig};
use vellumdb::env::DiskEnv;

const KEY_COUNT: usize = 1_000;

fn open_db(path: &std::path::Path, kv_sep_size: usize) -> Db {
    Db::open(
        path,
        DbConfig {
            kv_sep_size,
            gc_threshold: 1 << 20,
            env: DiskEnv::shared(),
        },
    )
    .expect("open db")
}

fn fill(db: &Db, value_size: usize) {
    let value = vec![0xabu8; value_size];
    for i in 0..KEY_COUNT {
        db.put(format!("key-{i:06}"), &value).unwrap();
    }
    db.flush().unwrap();
}

fn bench_put_flush(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_flush");
    for &value_size in &[64usize, 2_048] {
        group.throughput(Throughput::Bytes((value_size * KEY_COUNT) as u64));
        let label = if value_size < 1_024 { "inline" } else { "separated" };
        group.bench_with_input(
            BenchmarkId::new(label, value_size),
            &value_size,
            |b, &value_size| {
                b.iter_with_setup(
                    || TempDir::new().unwrap(),
                    |tmp| {
                        let db = open_db(tmp.path(), 1_024);
                        fill(&db, value_size);
                    },
                );
            },
        );
    }
    group.finish();
}

fn bench_point_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("point_get");
    for &value_size in &[64usize, 2_048] {
        let tmp = TempDir::new().unwrap();
        let db = open_db(tmp.path(), 1_024);
        fill(&db, value_size);

        group.throughput(Throughput::Bytes(value_size as u64));
        let label = if value_size < 1_024 { "inline" } else { "separated" };
        group.bench_with_input(BenchmarkId::new(label, value_size), &db, |b, db| {
            let mut i = 0usize;
            b.iter(|| {
                let key = format!("key-{:06}", i % KEY_COUNT);
                i += 1;
                db.get(key.as_bytes()).unwrap().unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_put_flush, bench_point_get);
criterion_main!(benches);
