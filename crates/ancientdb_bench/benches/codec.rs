//! Item codec and on-disk format benchmarks.

use ancientdb_bench::{random_data, repetitive_data};
use ancientdb_core::table::{IndexEntry, TableMetadata};
use ancientdb_core::ItemCodec;
use ancientdb_storage::{InMemoryBackend, StorageBackend};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// Benchmark compressing items.
fn bench_compress(c: &mut Criterion) {
    let mut group = c.benchmark_group("compress");
    let codec = ItemCodec::new(true);

    for size in [256, 4096, 65536].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("repetitive", size), size, |b, &size| {
            let data = repetitive_data(size);
            b.iter(|| black_box(codec.encode(black_box(&data)).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("random", size), size, |b, &size| {
            let data = random_data(size);
            b.iter(|| black_box(codec.encode(black_box(&data)).unwrap()));
        });
    }
    group.finish();
}

/// Benchmark decompressing items.
fn bench_decompress(c: &mut Criterion) {
    let mut group = c.benchmark_group("decompress");
    let codec = ItemCodec::new(true);

    for size in [256, 4096, 65536].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let stored = codec.encode(&repetitive_data(size)).unwrap();
            b.iter(|| black_box(codec.decode(black_box(stored.clone())).unwrap()));
        });
    }
    group.finish();
}

/// Benchmark index entry encoding and decoding.
fn bench_index_entries(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_entry");

    group.bench_function("encode", |b| {
        let entry = IndexEntry::new(3, 1_048_576);
        b.iter(|| black_box(black_box(entry).encode()));
    });
    group.bench_function("decode", |b| {
        let raw = IndexEntry::new(3, 1_048_576).encode();
        b.iter(|| black_box(IndexEntry::decode(black_box(&raw))));
    });
    group.bench_function("append_1000", |b| {
        b.iter(|| {
            let mut index = InMemoryBackend::new();
            let mut buf = Vec::with_capacity(8 * 1000);
            for offset in 0..1000u32 {
                IndexEntry::new(0, offset * 64).encode_into(&mut buf);
            }
            index.append(&buf).unwrap();
            black_box(index.size().unwrap());
        });
    });
    group.finish();
}

/// Benchmark metadata encoding and decoding.
fn bench_metadata(c: &mut Criterion) {
    let mut group = c.benchmark_group("metadata");
    let meta = TableMetadata::new(12_345, 8 * 100_000);

    group.bench_function("encode", |b| {
        b.iter(|| black_box(black_box(&meta).encode()));
    });
    group.bench_function("decode", |b| {
        let raw = meta.encode();
        b.iter(|| black_box(TableMetadata::decode("bench", black_box(&raw)).unwrap()));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_compress,
    bench_decompress,
    bench_index_entries,
    bench_metadata,
);

criterion_main!(benches);
