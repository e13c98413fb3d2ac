//! Correlation and decimation performance benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lib_dsp::{correlate, downsample, CorrelationMode, Normalization};
use lib_types::{Seconds, Trace};

fn trace(n: usize, freq: f64) -> Trace {
    let y = (0..n).map(|i| (i as f64 * freq).sin()).collect();
    Trace::new(Seconds(0.0), Seconds(0.01), y)
}

fn bench_correlation(c: &mut Criterion) {
    let mut group = c.benchmark_group("correlation");

    for len in [256, 1024, 4096, 16384].iter() {
        let a = trace(*len / 4, 0.03);
        let b = trace(*len, 0.01);

        // Only benchmark direct correlation for small sizes
        if *len <= 4096 {
            group.bench_with_input(BenchmarkId::new("direct", len), &(&a, &b), |bench, (a, b)| {
                bench.iter(|| {
                    correlate(black_box(a), black_box(b), CorrelationMode::Full, Normalization::None, false)
                });
            });
        }

        group.bench_with_input(BenchmarkId::new("fft", len), &(&a, &b), |bench, (a, b)| {
            bench.iter(|| {
                correlate(black_box(a), black_box(b), CorrelationMode::Full, Normalization::None, true)
            });
        });
    }

    group.finish();
}

fn bench_downsample(c: &mut Criterion) {
    let mut group = c.benchmark_group("downsample");

    for ratio in [2usize, 10, 50].iter() {
        let tr = trace(100_000, 0.02);
        group.bench_with_input(BenchmarkId::new("batch", ratio), &tr, |bench, tr| {
            bench.iter(|| {
                let mut t = tr.clone();
                downsample(&mut t, black_box(*ratio), true, false)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_correlation, bench_downsample);
criterion_main!(benches);
