//! Commit and recovery benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ltf_bench::{memory_partition, replace_object};
use ltf_core::{JournalConfig, Partition, PartitionId};
use ltf_storage::{FileBackend, StorageBackend};
use tempfile::TempDir;

/// Benchmark commits of one object over in-memory mirrors.
fn bench_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit");
    let config = JournalConfig::new().segment_count(64).segment_size(64 * 1024);

    for size in [256, 4096, 60 * 1024, 256 * 1024].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let partition = memory_partition(config.clone(), 2);
            let mut previous = None;

            b.iter(|| {
                previous = Some(replace_object(&partition, previous, black_box(size)));
            });
        });
    }

    group.finish();
}

/// Benchmark commit latency as the mirror count grows.
fn bench_mirrors(c: &mut Criterion) {
    let mut group = c.benchmark_group("commit_mirrors");
    let config = JournalConfig::new().segment_count(64).segment_size(16 * 1024);

    for mirrors in [1, 2, 3].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(mirrors), mirrors, |b, &mirrors| {
            let partition = memory_partition(config.clone(), mirrors);
            let mut previous = None;

            b.iter(|| {
                previous = Some(replace_object(&partition, previous, 1024));
            });
        });
    }

    group.finish();
}

/// Benchmark commits to file-backed mirrors (sync on every write).
fn bench_file_commit(c: &mut Criterion) {
    let mut group = c.benchmark_group("file_commit");
    group.sample_size(20);

    let config = JournalConfig::new().segment_count(32).segment_size(16 * 1024);
    let temp_dir = TempDir::new().unwrap();
    let backends: Vec<Box<dyn StorageBackend>> = (0..2)
        .map(|i| {
            let path = temp_dir.path().join(format!("mirror-{i}.ltf"));
            Box::new(FileBackend::create(&path, config.device_capacity()).unwrap())
                as Box<dyn StorageBackend>
        })
        .collect();
    let partition = Partition::format(PartitionId::new(1), config, backends).unwrap();
    let mut previous = None;

    group.bench_function("1KB", |b| {
        b.iter(|| {
            previous = Some(replace_object(&partition, previous, 1024));
        });
    });

    group.finish();
}

/// Benchmark recovery of a full journal.
fn bench_recovery(c: &mut Criterion) {
    let mut group = c.benchmark_group("recovery");
    let config = JournalConfig::new().segment_count(128).segment_size(4096);

    let partition = memory_partition(config.clone(), 2);
    let mut previous = None;
    for _ in 0..120 {
        previous = Some(replace_object(&partition, previous, 2048));
    }

    group.bench_function("120_transactions", |b| {
        b.iter(|| {
            let state = partition.recover_snapshot().unwrap();
            black_box(state.transactions.len());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_commit,
    bench_mirrors,
    bench_file_commit,
    bench_recovery,
);

criterion_main!(benches);
