//! CRC-32 throughput benchmark.

use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use oxz_core::crc::Crc32;
use std::hint::black_box;

fn bench_crc32(c: &mut Criterion) {
    let mut group = c.benchmark_group("crc32");

    for size in [64usize, 4096, 65536] {
        let data: Vec<u8> = (0..size).map(|i| (i * 31 + 7) as u8).collect();
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("compute/{size}"), |b| {
            b.iter(|| Crc32::compute(black_box(&data)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_crc32);
criterion_main!(benches);
