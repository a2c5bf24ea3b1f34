//! Performance benchmarks for satchel-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use satchel_engine::{
    ConflictResolver, DatasetAuthority, LastWriterWins, LocalStore, MemoryStore, Record,
    RecordPush, SqliteStore,
};

fn record(key: String, value: &str, modified_at: u64) -> Record {
    Record::new(key, Some(value.to_string()), "device-1", modified_at)
}

fn bench_resolver(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolver");
    let local = record("high".into(), "95", 2000);
    let remote = record("high".into(), "100", 2000).confirmed(5);

    group.bench_function("last_writer_wins", |b| {
        b.iter(|| LastWriterWins.resolve(black_box(&local), black_box(&remote)))
    });

    group.finish();
}

fn bench_authority(c: &mut Criterion) {
    let mut group = c.benchmark_group("authority");

    for size in [10, 100, 1000].iter() {
        let pushes: Vec<RecordPush> = (0..*size)
            .map(|i| RecordPush::new(record(format!("key_{}", i), "value", 1000), 0))
            .collect();

        group.bench_with_input(BenchmarkId::new("apply_push", size), &pushes, |b, pushes| {
            b.iter(|| {
                let mut authority = DatasetAuthority::new("scores", 0);
                authority.apply_push(black_box(pushes.clone()), "device-1", 1000)
            })
        });

        let mut authority = DatasetAuthority::new("scores", 0);
        authority.apply_push(pushes.clone(), "device-1", 1000);
        group.bench_with_input(BenchmarkId::new("list_since", size), &authority, |b, a| {
            b.iter(|| a.list_since(black_box(0)))
        });
    }

    group.finish();
}

fn bench_local_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_store");

    group.bench_function("memory_put_record", |b| {
        let store = MemoryStore::new();
        store.create_dataset("user", "scores").unwrap();
        let mut id = 0u64;

        b.iter(|| {
            id += 1;
            store.put_record("user", "scores", record(format!("key_{}", id % 1000), "v", id))
        })
    });

    group.bench_function("sqlite_put_record", |b| {
        let store = SqliteStore::in_memory().unwrap();
        store.create_dataset("user", "scores").unwrap();
        let mut id = 0u64;

        b.iter(|| {
            id += 1;
            store.put_record("user", "scores", record(format!("key_{}", id % 100), "v", id))
        })
    });

    group.finish();
}

criterion_group!(benches, bench_resolver, bench_authority, bench_local_store);
criterion_main!(benches);
