//! Fingerprint and payload codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use diffdb_bench::{random_row, sample_row};
use diffdb_codec::{encode, fingerprint};

/// Benchmark fingerprinting a small fixed row.
fn bench_fingerprint_row(c: &mut Criterion) {
    let row = sample_row();
    c.bench_function("fingerprint/row", |b| {
        b.iter(|| fingerprint(black_box(&row)).unwrap());
    });
}

/// Benchmark fingerprinting rows with growing maps.
fn bench_fingerprint_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint_map");

    for attributes in [4, 32, 256].iter() {
        let row = random_row(*attributes, 16);
        group.throughput(Throughput::Elements(*attributes as u64));
        group.bench_with_input(BenchmarkId::from_parameter(attributes), &row, |b, row| {
            b.iter(|| fingerprint(black_box(row)).unwrap());
        });
    }
    group.finish();
}

/// Benchmark encoding the payload that gets staged.
fn bench_encode_row(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");

    for attributes in [0, 32].iter() {
        let row = random_row(*attributes, 16);
        group.bench_with_input(BenchmarkId::from_parameter(attributes), &row, |b, row| {
            b.iter(|| encode(black_box(row)).unwrap());
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_fingerprint_row,
    bench_fingerprint_map,
    bench_encode_row
);
criterion_main!(benches);
