//! On-disk codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ltf_bench::object_data;
use ltf_core::format::{checksum, ObjectRecord, PartLayout, TransactionBody};
use ltf_core::{GenerationId, ObjectId, ObjectType, SegmentHeader, Superblock};

/// Benchmark header encode/decode.
fn bench_headers(c: &mut Criterion) {
    let mut group = c.benchmark_group("headers");

    let superblock = Superblock::fresh(64, 512 * 1024);
    let encoded = superblock.encode();
    group.bench_function("superblock_encode", |b| b.iter(|| black_box(superblock.encode())));
    group.bench_function("superblock_decode", |b| {
        b.iter(|| black_box(Superblock::decode(black_box(&encoded)).unwrap()))
    });

    let header = SegmentHeader::continuation(7, 5, 1, GenerationId::new(42));
    let encoded = header.encode();
    group.bench_function("segment_header_decode", |b| {
        b.iter(|| black_box(SegmentHeader::decode(black_box(&encoded)).unwrap()))
    });

    group.finish();
}

/// Benchmark body encoding and part checksums.
fn bench_body(c: &mut Criterion) {
    let mut group = c.benchmark_group("body");

    for size in [1024, 64 * 1024, 1024 * 1024].iter() {
        let body = TransactionBody {
            removals: vec![ObjectId::new(); 4],
            adds: vec![ObjectRecord {
                id: ObjectId::new(),
                object_type: ObjectType::new(1),
                payload: object_data(*size),
            }],
        };
        group.throughput(Throughput::Bytes(*size as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &body, |b, body| {
            b.iter(|| black_box(body.encode()))
        });

        let encoded = body.encode();
        let layout = PartLayout::plan(encoded.len(), 512 * 1024).unwrap();
        group.bench_with_input(BenchmarkId::new("part_checksums", size), &encoded, |b, encoded| {
            b.iter(|| {
                let sums: Vec<u32> = (0..layout.part_count)
                    .map(|i| checksum(&[&encoded[layout.body_span(i)]]))
                    .collect();
                black_box(sums)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_headers, bench_body);
criterion_main!(benches);
