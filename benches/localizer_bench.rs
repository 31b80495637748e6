use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::Rng;
use shardml::data::{FeaId, Row, RowBlock};
use shardml::localize::{localize, make_pool, KeyTransform};

fn random_block(num_rows: usize, nnz_per_row: usize, key_space: u64) -> RowBlock<FeaId> {
    let mut rng = rand::thread_rng();
    let rows: Vec<Row> = (0..num_rows)
        .map(|_| {
            let features = (0..nnz_per_row).map(|_| rng.gen_range(0..key_space)).collect();
            Row::new(1.0, features)
        })
        .collect();
    RowBlock::from_rows(&rows)
}

fn bench_localize(c: &mut Criterion) {
    let pool = make_pool(4).unwrap();
    let mut group = c.benchmark_group("localize");
    for &rows in &[1_000usize, 20_000] {
        let block = random_block(rows, 30, 1_000_000);
        group.bench_with_input(BenchmarkId::new("verbatim", rows), &rows, |b, _| {
            b.iter(|| localize(black_box(&block), KeyTransform::Verbatim, &pool).unwrap());
        });
    }
    group.finish();
}

fn bench_thread_scaling(c: &mut Criterion) {
    let block = random_block(20_000, 30, 1_000_000);
    let mut group = c.benchmark_group("localize_thread_scaling");
    for &threads in &[1usize, 2, 4, 8] {
        let pool = make_pool(threads).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, _| {
            b.iter(|| localize(black_box(&block), KeyTransform::Verbatim, &pool).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_localize, bench_thread_scaling);
criterion_main!(benches);
