use assetcache_rs::{AssetCache, Compression, LogicalFile};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::BTreeMap;

/// Benchmark chain reads with a hot reference table cache
fn bench_get_file(c: &mut Criterion) {
    let sizes = vec![512usize, 16 * 1024, 512 * 1024];

    let mut group = c.benchmark_group("get_file");

    for size in sizes {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let cache = AssetCache::in_memory();
            for file_id in 0..16 {
                cache
                    .put_file(1, file_id, &LogicalFile::blob(vec![0x42u8; size]), Compression::None)
                    .unwrap();
            }

            b.iter(|| {
                for file_id in 0..16 {
                    black_box(cache.get_file(1, file_id).unwrap());
                }
            });
        });
    }

    group.finish();
}

/// Benchmark writes, including the reference table rewrite
fn bench_put_file(c: &mut Criterion) {
    let mut group = c.benchmark_group("put_file");
    group.sample_size(20);

    for compression in Compression::ALL {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{:?}", compression)),
            &compression,
            |b, &compression| {
                let cache = AssetCache::in_memory();
                let payload: Vec<u8> = (0..32 * 1024u32).map(|i| (i % 97) as u8).collect();
                let file = LogicalFile::blob(payload);
                let mut file_id = 0u32;

                b.iter(|| {
                    file_id = (file_id + 1) % 256;
                    black_box(cache.put_file(2, file_id, &file, compression).unwrap());
                });
            },
        );
    }

    group.finish();
}

/// Benchmark decoding an entry-packed file
fn bench_entry_unpack(c: &mut Criterion) {
    let entry_counts = vec![4u32, 64, 512];

    let mut group = c.benchmark_group("entry_unpack");

    for count in entry_counts {
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let cache = AssetCache::in_memory();
            let entries: BTreeMap<u32, Vec<u8>> =
                (0..count).map(|id| (id, vec![id as u8; 64])).collect();
            cache
                .put_file(3, 0, &LogicalFile::entries(entries), Compression::Gzip)
                .unwrap();

            b.iter(|| black_box(cache.get_file(3, 0).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_get_file, bench_put_file, bench_entry_unpack);
criterion_main!(benches);
