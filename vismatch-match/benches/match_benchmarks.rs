use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use vismatch_core::{DescriptorSet, DeviceConfig};
use vismatch_match::{MatchEngine, MatcherConfig, SearchMode};

/// Pseudo-random binary descriptors; `seed` keeps query and train distinct
fn create_binary_set(rows: usize, seed: u32) -> DescriptorSet {
    let mut state = seed.wrapping_mul(2_654_435_761).max(1);
    let data = (0..rows * 32)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 24) as u8
        })
        .collect();
    DescriptorSet::binary(rows, 32, data).unwrap()
}

fn create_float_set(rows: usize, seed: u32) -> DescriptorSet {
    let data = (0..rows * 128)
        .map(|i| (((i as u32).wrapping_mul(seed + 7) % 97) as f32) / 97.0)
        .collect();
    DescriptorSet::float(rows, 128, data).unwrap()
}

/// Low-dimensional float rows with few repeated coordinates
fn create_point_set(rows: usize, seed: u32) -> DescriptorSet {
    let mut state = seed.wrapping_mul(2_654_435_761).max(1);
    let data = (0..rows * 8)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 8) as f32 / (1 << 24) as f32
        })
        .collect();
    DescriptorSet::float(rows, 8, data).unwrap()
}

/// Each strategy on the same binary inputs
fn bench_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("strategies");

    for &rows in &[250, 1000] {
        let query = create_binary_set(rows, 1);
        let train = create_binary_set(rows, 2);
        let size = format!("{}x{}", rows, rows);

        let mut nearest = MatchEngine::new(MatcherConfig::binary()).unwrap();
        group.bench_with_input(BenchmarkId::new("nearest", &size), &rows, |b, _| {
            b.iter(|| black_box(nearest.match_descriptors(&query, &train, false).unwrap().len()))
        });

        let mut ratio = MatchEngine::new(MatcherConfig::binary()).unwrap();
        group.bench_with_input(BenchmarkId::new("ratio_test", &size), &rows, |b, _| {
            b.iter(|| black_box(ratio.match_descriptors(&query, &train, true).unwrap().len()))
        });

        let mut cross = MatchEngine::new(MatcherConfig::binary().with_cross_check(true)).unwrap();
        group.bench_with_input(BenchmarkId::new("cross_check", &size), &rows, |b, _| {
            b.iter(|| black_box(cross.match_descriptors(&query, &train, false).unwrap().len()))
        });

        let device = DeviceConfig {
            name: "bench".to_string(),
            ..DeviceConfig::default()
        };
        let mut gpu = MatchEngine::new(MatcherConfig::binary().on_gpu().with_device(device)).unwrap();
        group.bench_with_input(BenchmarkId::new("device_nearest", &size), &rows, |b, _| {
            b.iter(|| black_box(gpu.match_descriptors(&query, &train, false).unwrap().len()))
        });
    }

    group.finish();
}

/// Hamming on 32-byte rows against L2 on 128-float rows
fn bench_metrics(c: &mut Criterion) {
    let mut group = c.benchmark_group("metrics");
    let rows = 500;

    let (bq, bt) = (create_binary_set(rows, 3), create_binary_set(rows, 4));
    let mut hamming = MatchEngine::new(MatcherConfig::binary()).unwrap();
    group.bench_function("hamming_32b", |b| {
        b.iter(|| black_box(hamming.match_descriptors(&bq, &bt, false).unwrap().len()))
    });

    let (fq, ft) = (create_float_set(rows, 3), create_float_set(rows, 4));
    let mut l2 = MatchEngine::new(MatcherConfig::default()).unwrap();
    group.bench_function("l2_128f", |b| {
        b.iter(|| black_box(l2.match_descriptors(&fq, &ft, false).unwrap().len()))
    });

    group.finish();
}

/// Exhaustive search against a KD-tree on 8-float rows
fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");

    for &rows in &[1000, 5000] {
        let (query, train) = (create_point_set(rows, 5), create_point_set(rows, 6));
        let size = format!("{}x{}", rows, rows);

        let mut brute = MatchEngine::new(MatcherConfig::default()).unwrap();
        group.bench_with_input(BenchmarkId::new("brute_force", &size), &rows, |b, _| {
            b.iter(|| black_box(brute.match_descriptors(&query, &train, true).unwrap().len()))
        });

        let mut tree = MatchEngine::new(MatcherConfig::default().with_search(SearchMode::KdTree)).unwrap();
        group.bench_with_input(BenchmarkId::new("kd_tree", &size), &rows, |b, _| {
            b.iter(|| black_box(tree.match_descriptors(&query, &train, true).unwrap().len()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_strategies, bench_metrics, bench_search);
criterion_main!(benches);
