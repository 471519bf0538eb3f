//! Benchmarks for the computational hot paths.
//!
//! Covers the SDR view conversions and overlap (exercised on every compute
//! cycle) and the Spatial Pooler's full compute step with and without
//! learning.
//!
//! Run with: `cargo bench --bench core_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use veles::prelude::*;

// =============================================================================
// SDR BENCHMARKS
// =============================================================================

fn bench_sdr_overlap(c: &mut Criterion) {
    let mut group = c.benchmark_group("sdr_overlap");
    let mut rng = Random::new(42);

    for &(size, sparsity) in &[(2048u32, 0.02f32), (2048, 0.10), (65536, 0.02)] {
        let mut a = Sdr::new(&[size]).unwrap();
        let mut b = Sdr::new(&[size]).unwrap();
        a.randomize(sparsity, &mut rng).unwrap();
        b.randomize(sparsity, &mut rng).unwrap();

        let active_bits = (size as f32 * sparsity) as u64;
        group.throughput(Throughput::Elements(active_bits * 2));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("size_{size}_sparsity_{sparsity}")),
            &(&a, &b),
            |bencher, (a, b)| {
                bencher.iter(|| black_box(a.get_overlap(b).unwrap()));
            },
        );
    }
    group.finish();
}

fn bench_sdr_conversions(c: &mut Criterion) {
    let mut group = c.benchmark_group("sdr_conversions");
    let mut rng = Random::new(42);

    let size = 4096u32;
    let mut template = Sdr::new(&[size]).unwrap();
    template.randomize(0.02, &mut rng).unwrap();
    let sparse = template.get_sparse().unwrap();
    let dense = template.get_dense().unwrap();

    group.throughput(Throughput::Elements(u64::from(size)));
    group.bench_function("sparse_to_dense", |bencher| {
        bencher.iter(|| {
            let mut sdr = Sdr::new(&[size]).unwrap();
            sdr.set_sparse(&sparse).unwrap();
            black_box(sdr.get_dense().unwrap())
        });
    });
    group.bench_function("dense_to_sparse", |bencher| {
        bencher.iter(|| {
            let mut sdr = Sdr::new(&[size]).unwrap();
            sdr.set_dense(&dense).unwrap();
            black_box(sdr.get_sparse().unwrap())
        });
    });
    group.finish();
}

// =============================================================================
// SPATIAL POOLER BENCHMARKS
// =============================================================================

fn sp_under_test(columns: u32) -> SpatialPooler {
    SpatialPooler::new(SpatialPoolerParams {
        input_dimensions: vec![1024],
        column_dimensions: vec![columns],
        potential_radius: 256,
        potential_pct: 0.5,
        global_inhibition: true,
        local_area_density: 0.02,
        num_active_columns_per_inh_area: 0,
        boost_strength: 3.0,
        seed: 42,
        ..Default::default()
    })
    .unwrap()
}

fn bench_sp_compute(c: &mut Criterion) {
    let mut group = c.benchmark_group("sp_compute");
    group.sample_size(30);

    for &columns in &[1024u32, 2048] {
        for &learn in &[false, true] {
            let mut sp = sp_under_test(columns);
            let mut rng = Random::new(7);
            let mut input = Sdr::new(&[1024]).unwrap();
            input.randomize(0.05, &mut rng).unwrap();
            let mut active = Sdr::new(&[columns]).unwrap();

            group.throughput(Throughput::Elements(u64::from(columns)));
            group.bench_with_input(
                BenchmarkId::from_parameter(format!("columns_{columns}_learn_{learn}")),
                &learn,
                |bencher, &learn| {
                    bencher.iter(|| {
                        black_box(sp.compute(&input, learn, &mut active).unwrap());
                    });
                },
            );
        }
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_sdr_overlap,
    bench_sdr_conversions,
    bench_sp_compute
);
criterion_main!(benches);
