//! Cartomem kernel benchmarks
//!
//! Benchmarks for the hot numeric paths using Criterion.
//! Run with: cargo bench -p cartomem-core

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use cartomem_core::{
    cosine_distance, DistanceMetric, GaussianSampler, GridBoundary, GridShape, GridTopology,
    NeighborhoodKernel, SomCore, WeightInit,
};

fn make_core(side: usize, dim: usize, seed: u64) -> SomCore {
    let topo = GridTopology::new(side, side, GridShape::Rectangular, GridBoundary::Bounded);
    let mut core = SomCore::new(topo, dim, DistanceMetric::Cosine);
    let mut sampler = GaussianSampler::seeded(seed);
    core.init_weights(WeightInit::Random, &mut sampler).unwrap();
    core
}

fn make_batch(count: usize, dim: usize, seed: u64) -> Vec<Vec<f64>> {
    let mut sampler = GaussianSampler::seeded(seed);
    (0..count)
        .map(|_| (0..dim).map(|_| sampler.next_gaussian()).collect())
        .collect()
}

fn bench_cosine_distance(c: &mut Criterion) {
    let batch = make_batch(2, 768, 1);
    c.bench_function("cosine_distance_768", |b| {
        b.iter(|| black_box(cosine_distance(&batch[0], &batch[1]).unwrap()))
    });
}

fn bench_bmu_single(c: &mut Criterion) {
    let core = make_core(20, 256, 2);
    let batch = make_batch(1, 256, 3);
    c.bench_function("bmu_single_20x20_d256", |b| {
        b.iter(|| black_box(core.find_bmu(&batch[0]).unwrap()))
    });
}

fn bench_bmu_batch(c: &mut Criterion) {
    let core = make_core(20, 256, 4);
    let batch = make_batch(64, 256, 5);
    c.bench_function("bmu_batch64_20x20_d256", |b| {
        b.iter(|| black_box(core.find_bmus_batch(&batch).unwrap()))
    });
}

fn bench_batch_update(c: &mut Criterion) {
    let batch = make_batch(64, 128, 7);
    c.bench_function("batch_update_64_15x15_d128", |b| {
        b.iter_batched(
            || {
                let core = make_core(15, 128, 6);
                let bmus: Vec<usize> = core
                    .find_bmus_batch(&batch)
                    .unwrap()
                    .into_iter()
                    .map(|(i, _)| i)
                    .collect();
                (core, bmus)
            },
            |(mut core, bmus)| {
                core.batch_update(&batch, &bmus, 0.1, 2.0, NeighborhoodKernel::Gaussian)
                    .unwrap();
                black_box(core)
            },
            criterion::BatchSize::SmallInput,
        )
    });
}

criterion_group!(
    benches,
    bench_cosine_distance,
    bench_bmu_single,
    bench_bmu_batch,
    bench_batch_update
);
criterion_main!(benches);
