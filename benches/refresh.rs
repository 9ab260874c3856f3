//! Benchmarks for tree refresh
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pointvis_rs::pipeline::{
    BoundingBoxFilter, CachePolicy, CacheStrategy, DataLoadFilter, DownsampleFilter, FilterId,
    FilterTree, FixedMemory, PropagationMasks, PropertyValue, RangeFileFilter, RefreshScheduler,
    SpectrumPlotFilter, VoxelNormalisation, VoxeliseFilter,
};
use pointvis_rs::types::{IonRange, RangeTable};

fn sample_tree(points: usize) -> (FilterTree, FilterId) {
    let mut tree = FilterTree::new();
    let load = tree
        .add_filter(None, DataLoadFilter::lattice(points, 0.5, vec![1.0, 2.0, 3.0]))
        .unwrap();
    let down = tree
        .add_filter(Some(load), DownsampleFilter::fraction(0.5))
        .unwrap();
    tree.add_filter(Some(down), VoxeliseFilter::new(16, VoxelNormalisation::Count))
        .unwrap();
    tree.add_filter(Some(down), BoundingBoxFilter::default())
        .unwrap();
    let range = tree
        .add_filter(
            Some(load),
            RangeFileFilter::new(RangeTable::new(vec![
                IonRange::new("A", 0.5, 1.5),
                IonRange::new("B", 1.5, 2.5),
            ])),
        )
        .unwrap();
    tree.add_filter(Some(range), SpectrumPlotFilter::new(0.05))
        .unwrap();
    (tree, down)
}

fn caching() -> RefreshScheduler {
    RefreshScheduler::new(CachePolicy::new(
        CacheStrategy::MemoryBudget { max_percent: 100.0 },
        Box::new(FixedMemory(u64::MAX)),
    ))
}

fn bench_full_refresh(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_refresh");

    for size in [10_000, 100_000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let (mut tree, _) = sample_tree(size);
            let mut scheduler = RefreshScheduler::new(CachePolicy::never());
            b.iter(|| black_box(scheduler.refresh(&mut tree).unwrap()));
        });
    }

    group.finish();
}

fn bench_cached_refresh(c: &mut Criterion) {
    let mut group = c.benchmark_group("cached_refresh");

    for size in [10_000, 100_000].iter() {
        group.bench_with_input(BenchmarkId::new("unchanged", size), size, |b, &size| {
            let (mut tree, _) = sample_tree(size);
            let mut scheduler = caching();
            scheduler.refresh(&mut tree).unwrap();
            b.iter(|| black_box(scheduler.refresh(&mut tree).unwrap()));
        });

        group.bench_with_input(BenchmarkId::new("edit_downsample", size), size, |b, &size| {
            let (mut tree, down) = sample_tree(size);
            let mut scheduler = caching();
            scheduler.refresh(&mut tree).unwrap();
            let mut fraction = 0.5;
            b.iter(|| {
                fraction = if fraction > 0.4 { 0.3 } else { 0.5 };
                tree.set_property(down, "fraction", &PropertyValue::Float(fraction))
                    .unwrap();
                black_box(scheduler.refresh(&mut tree).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_mask_analysis(c: &mut Criterion) {
    let (tree, _) = sample_tree(100);
    c.bench_function("propagation_masks", |b| {
        b.iter(|| black_box(PropagationMasks::compute(&tree)))
    });
}

criterion_group!(
    benches,
    bench_full_refresh,
    bench_cached_refresh,
    bench_mask_analysis
);
criterion_main!(benches);
