//! Differential operation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use diffdb_bench::{ids, random_row};
use diffdb_core::{Config, CoreError, Database, NeverCancel};
use tempfile::tempdir;

/// Benchmark staging changed rows.
fn bench_add_changed(c: &mut Criterion) {
    let db = Database::open_in_memory().unwrap();
    let diff = db.open_differential("bench").unwrap();
    let row = random_row(8, 16);
    let mut round = 0u64;

    c.bench_function("add/changed", |b| {
        b.iter(|| {
            let mut row = row.clone();
            row.updated_at = round;
            round += 1;
            diff.add(b"row", black_box(&row)).unwrap();
        });
    });
}

/// Benchmark re-adding rows that are already applied.
fn bench_add_unchanged(c: &mut Criterion) {
    let db = Database::open_in_memory().unwrap();
    let diff = db.open_differential("bench").unwrap();
    let row = random_row(8, 16);
    diff.add(b"row", &row).unwrap();
    diff.each(&NeverCancel, |_, _| Ok::<_, CoreError>(())).unwrap();

    c.bench_function("add/unchanged", |b| {
        b.iter(|| diff.add(b"row", black_box(&row)).unwrap());
    });
}

/// Benchmark draining a batch of staged rows.
fn bench_each(c: &mut Criterion) {
    let mut group = c.benchmark_group("each");

    for batch in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch as u64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), batch, |b, &batch| {
            let ids = ids(batch);
            let rows: Vec<_> = (0..batch).map(|_| random_row(4, 16)).collect();

            b.iter_batched(
                || {
                    let db = Database::open_in_memory().unwrap();
                    let diff = db.open_differential("bench").unwrap();
                    for (id, row) in ids.iter().zip(&rows) {
                        diff.add(id, row).unwrap();
                    }
                    (db, diff)
                },
                |(_db, diff)| {
                    diff.each(&NeverCancel, |id, data| {
                        black_box((id, data.as_bytes()));
                        Ok::<_, CoreError>(())
                    })
                    .unwrap();
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

/// Benchmark durable adds on disk.
fn bench_add_on_disk(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_on_disk");

    for sync in [false, true].iter() {
        group.bench_with_input(BenchmarkId::new("sync", sync), sync, |b, &sync| {
            let temp = tempdir().unwrap();
            let config = Config::default().sync_on_commit(sync);
            let db = Database::open_with_config(temp.path(), config).unwrap();
            let diff = db.open_differential("bench").unwrap();
            let mut round = 0u64;

            b.iter(|| {
                round += 1;
                diff.add(b"row", black_box(&round)).unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_add_changed,
    bench_add_unchanged,
    bench_each,
    bench_add_on_disk
);
criterion_main!(benches);
