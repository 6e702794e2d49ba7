//! Benchmarks for data preparation and the epoch loop.
//!
//! Run with: cargo bench --bench windowing_bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array2;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

use seqtrain::all::*;

/// Noisy multi-feature signal of `len` rows.
fn create_synthetic_signal(len: usize, n_features: usize) -> Array2<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    Array2::from_shape_fn((len, n_features), |(t, j)| {
        (t as f32 * 0.05 * (j + 1) as f32).sin() + rng.gen::<f32>() * 0.1
    })
}

fn create_dataset(len: usize, horizon: usize) -> SequenceDataset {
    SequenceDataset::builder()
        .horizon(horizon)
        .sequence("Y", create_synthetic_signal(len, 3))
        .sequence("U", create_synthetic_signal(len, 2))
        .build()
        .unwrap()
}

fn bench_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("window");

    for len in [1_000, 10_000, 100_000].iter() {
        let signal = create_synthetic_signal(*len, 4);

        group.bench_with_input(BenchmarkId::new("window", len), len, |b, _| {
            b.iter(|| window(black_box(signal.view()), 32).unwrap())
        });

        let windows = window(signal.view(), 32).unwrap();
        group.bench_with_input(BenchmarkId::new("unwindow", len), len, |b, _| {
            b.iter(|| unwindow(black_box(windows.view())))
        });
    }

    group.finish();
}

fn bench_dataset_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("dataset_build");
    group.sample_size(20);

    for len in [1_000, 10_000].iter() {
        let y = create_synthetic_signal(*len, 3);
        let u = create_synthetic_signal(*len, 2);

        group.bench_with_input(BenchmarkId::new("SequenceDataset", len), len, |b, _| {
            b.iter(|| {
                SequenceDataset::builder()
                    .horizon(16)
                    .sequence("Y", y.clone())
                    .sequence("U", u.clone())
                    .build()
                    .unwrap()
            })
        });
    }

    group.finish();
}

fn bench_loader_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("loader_pass");
    let ds = create_dataset(20_000, 16);

    for batch_size in [8, 32, 128].iter() {
        let loader = BundleLoader::builder(ds.nstep(Split::Train).clone())
            .batch_size(*batch_size)
            .shuffle(true)
            .seed(Seed::new(42))
            .build()
            .unwrap();

        group.bench_with_input(BenchmarkId::new("shuffled", batch_size), batch_size, |b, _| {
            let mut epoch = 0;
            b.iter(|| {
                epoch += 1;
                loader.batches(epoch).map(|batch| black_box(batch.n_samples())).sum::<usize>()
            })
        });
    }

    group.finish();
}

fn bench_train_epoch(c: &mut Criterion) {
    let mut group = c.benchmark_group("train_epoch");
    group.sample_size(10);

    let ds = create_dataset(5_000, 8);
    for batch_size in [16, 64].iter() {
        let config = DatasetConfig {
            horizon: 8,
            batch_size: Some(*batch_size),
            ..Default::default()
        };

        group.bench_with_input(
            BenchmarkId::new("LinearPredictor", batch_size),
            batch_size,
            |b, _| {
                b.iter(|| {
                    let loaders = LoaderSet::nstep(&ds, &config).unwrap();
                    let model = LinearPredictor::for_dataset(&ds, Seed::new(0)).unwrap();
                    let mut trainer = Trainer::builder(model, Sgd::with_lr(0.05), loaders)
                        .config(TrainerConfig::default().with_epochs(1))
                        .build()
                        .unwrap();
                    black_box(trainer.train().unwrap())
                })
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_window,
    bench_dataset_build,
    bench_loader_pass,
    bench_train_epoch,
);
criterion_main!(benches);
