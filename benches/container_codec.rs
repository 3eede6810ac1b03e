//! Benchmarks for container framing, index merging and store appends

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tmco_rs::core::container;
use tmco_rs::{Container, Index, KvStore, Options, Versions};

fn sample_cache(size: usize) -> Vec<u8> {
    let mut cache = vec![0u8; size.max(12)];
    cache[8..12].copy_from_slice(&(size as u32).to_le_bytes());
    cache
}

fn sample_versions() -> Versions {
    Versions::new()
        .with("engine", "10.2.154.26-node.26")
        .with("modules", "108")
        .with("platform", "18.17.0")
}

fn benchmark_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("container_encode");
    let versions = sample_versions();
    let options = Options {
        filename: "main.js".to_string(),
        optimized: true,
        externals: vec!["fs".to_string(), "path".to_string()],
        assets: Vec::new(),
    };

    for size in [1024usize, 64 * 1024, 1024 * 1024].iter() {
        let cache = sample_cache(*size);
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                container::encode(&versions, &options, size as u64, black_box(&cache)).unwrap()
            });
        });
    }

    group.finish();
}

fn benchmark_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("container_decode");

    for size in [1024usize, 64 * 1024, 1024 * 1024].iter() {
        let bytes = Container::new(sample_versions(), Options::default(), sample_cache(*size))
            .unwrap()
            .encode()
            .unwrap();
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &bytes, |b, bytes| {
            b.iter(|| Container::decode(black_box(bytes)).unwrap());
        });
    }

    group.finish();
}

fn benchmark_index_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("index_merge");

    for count in [10usize, 1000, 10000].iter() {
        let previous = Index::build((0..*count).map(|i| format!("lib/old{}.js", i)), None);
        let fresh: Vec<String> = (0..*count).map(|i| format!("lib/new{}.js", i)).collect();

        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, _| {
            b.iter(|| Index::build(fresh.iter().cloned(), Some(black_box(&previous))));
        });
    }

    group.finish();
}

fn benchmark_store_put(c: &mut Criterion) {
    let mut group = c.benchmark_group("kv_put");
    let value = vec![0xabu8; 4096];

    for count in [10usize, 100, 1000].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            b.iter(|| {
                let store = KvStore::from_bytes(&[]).unwrap();
                for i in 0..count {
                    store.put(&format!("member{}.js", i), black_box(&value)).unwrap();
                }
                store
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_encode,
    benchmark_decode,
    benchmark_index_merge,
    benchmark_store_put
);
criterion_main!(benches);
