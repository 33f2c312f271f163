// Table read benchmarks for AiDb

use aidb_table::config::TableOptions;
use aidb_table::env::{Env, PosixEnv};
use aidb_table::key::{InternalKey, ValueType, MAX_SEQUENCE_NUMBER};
use aidb_table::sstable::{
    InternalIterator, ReadOptions, TableBuilder, TableBuilderOptions, TableContext, TableReader,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use std::hint::black_box;
use std::sync::Arc;
use tempfile::TempDir;

fn open_table(temp_dir: &TempDir, size: usize) -> TableReader {
    let path = temp_dir.path().join("000001.sst");
    let ctx = Arc::new(TableContext::new(TableOptions::default()).unwrap());
    let file = PosixEnv.new_writable_file(&path).unwrap();
    let mut builder = TableBuilder::new(Arc::clone(&ctx), file, TableBuilderOptions::default());
    for i in 0..size {
        let key = InternalKey::new(format!("key{:08}", i).as_bytes(), 1, ValueType::Value);
        builder.add(key.encode(), format!("value{:08}", i).as_bytes()).unwrap();
    }
    builder.finish().unwrap();
    TableReader::open_path(ctx, &path).unwrap()
}

fn lookup_key(i: usize) -> Vec<u8> {
    InternalKey::for_seek(format!("key{:08}", i).as_bytes(), MAX_SEQUENCE_NUMBER).into_encoded()
}

fn benchmark_random_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("random_get");

    for size in [1000, 10000, 100000].iter() {
        let temp_dir = TempDir::new().unwrap();
        let reader = open_table(&temp_dir, *size);
        let opts = ReadOptions::default();

        group.throughput(Throughput::Elements(1000));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let mut rng = rand::rng();
            b.iter(|| {
                for _ in 0..1000 {
                    let key = lookup_key(rng.random_range(0..size));
                    black_box(reader.get(&opts, &key).unwrap());
                }
            });
        });
    }

    group.finish();
}

fn benchmark_missing_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("missing_get");
    let temp_dir = TempDir::new().unwrap();
    let reader = open_table(&temp_dir, 100000);
    let opts = ReadOptions::default();

    group.throughput(Throughput::Elements(1000));
    group.bench_function("bloom_rejects", |b| {
        b.iter(|| {
            for i in 0..1000 {
                let key = InternalKey::for_seek(format!("absent{:08}", i).as_bytes(), MAX_SEQUENCE_NUMBER);
                black_box(reader.get(&opts, key.encode()).unwrap());
            }
        });
    });

    group.finish();
}

fn benchmark_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_scan");

    for size in [10000, 100000].iter() {
        let temp_dir = TempDir::new().unwrap();
        let reader = open_table(&temp_dir, *size);

        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let mut iter = reader.iter(ReadOptions::default());
                iter.seek_to_first();
                let mut n = 0;
                while iter.valid() {
                    black_box(iter.value());
                    n += 1;
                    iter.next();
                }
                n
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_random_get, benchmark_missing_get, benchmark_scan);
criterion_main!(benches);
