use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::Rng;
use shardml::data::RowBlock;
use shardml::kernels::{spmm_times, spmm_trans_times_plus, spmv_times, spmv_trans_times};
use shardml::localize::make_pool;

fn random_block(num_rows: usize, u: usize, nnz_per_row: usize) -> RowBlock<u32> {
    let mut rng = rand::thread_rng();
    let mut offsets = Vec::with_capacity(num_rows + 1);
    let mut indices = Vec::with_capacity(num_rows * nnz_per_row);
    offsets.push(0u32);
    for _ in 0..num_rows {
        for _ in 0..nnz_per_row {
            indices.push(rng.gen_range(0..u as u32));
        }
        offsets.push(indices.len() as u32);
    }
    RowBlock {
        labels: vec![1.0; num_rows],
        offsets,
        indices,
        values: None,
        weights: None,
    }
}

fn bench_spmv(c: &mut Criterion) {
    let pool = make_pool(4).unwrap();
    let mut group = c.benchmark_group("spmv");
    for &rows in &[1_000usize, 10_000] {
        let u = rows / 2;
        let block = random_block(rows, u, 20);
        let x = vec![1.0f32; u];

        group.bench_with_input(BenchmarkId::new("times", rows), &rows, |b, _| {
            b.iter(|| spmv_times(black_box(&block), black_box(&x), &pool));
        });

        let y = vec![1.0f32; rows];
        group.bench_with_input(BenchmarkId::new("trans_times", rows), &rows, |b, _| {
            b.iter(|| spmv_trans_times(black_box(&block), black_box(&y), u, &pool));
        });
    }
    group.finish();
}

fn bench_spmm(c: &mut Criterion) {
    let pool = make_pool(4).unwrap();
    let d = 16;
    let mut group = c.benchmark_group("spmm");
    for &rows in &[1_000usize, 10_000] {
        let u = rows / 2;
        let block = random_block(rows, u, 20);
        let x = vec![0.1f32; u * d];

        group.bench_with_input(BenchmarkId::new("times", rows), &rows, |b, _| {
            b.iter(|| spmm_times(black_box(&block), black_box(&x), d, &pool));
        });

        let input = vec![0.1f32; rows * d];
        let z = vec![0.0f32; u * d];
        group.bench_with_input(BenchmarkId::new("trans_times_plus", rows), &rows, |b, _| {
            b.iter(|| spmm_trans_times_plus(black_box(&block), black_box(&input), 1.0, &z, u, d, &pool));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_spmv, bench_spmm);
criterion_main!(benches);
