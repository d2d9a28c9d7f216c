//! # Capability Planner Benchmarks
//!
//! Every registry update runs the classifier and both planners, so their
//! cost bounds how fast a node follows the registry.
//!
//! | Stage | Input | Target |
//! |-------|-------|--------|
//! | DON classification | 200 DONs | < 1ms |
//! | Flat peer set | 200 DONs × 16 members | < 5ms |
//! | DON pairs | 200 DONs (bootstrap: all pairs) | < 10ms |

use capability_launcher::domain::{all_dons, DonClassification};
use capability_launcher::{don_pairs_to_update, peers};
use capability_tests::benchmarks::GeneratedNetwork;
use capability_types::StreamConfig;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

const SIZES: [u32; 3] = [10, 50, 100];

fn bench_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("don-classification");
    group.measurement_time(Duration::from_secs(5));

    for size in SIZES {
        let network = GeneratedNetwork::new(size, size, 16);
        let snapshot = network.snapshot();
        let me = network.workflow_node();

        group.throughput(Throughput::Elements(u64::from(size * 2)));
        group.bench_with_input(BenchmarkId::new("classify", size * 2), &snapshot, |b, s| {
            b.iter(|| {
                let dons = DonClassification::classify(black_box(s), &me).ok();
                black_box(dons.map(|d| d.remote_capability_dons.len()))
            })
        });
    }

    group.finish();
}

fn bench_peer_set(c: &mut Criterion) {
    let mut group = c.benchmark_group("peer-set");
    group.measurement_time(Duration::from_secs(5));

    for size in SIZES {
        let network = GeneratedNetwork::new(size, size, 16);
        let snapshot = network.snapshot();
        let dons = all_dons(&snapshot);

        group.throughput(Throughput::Elements(u64::from(size * 2)));
        group.bench_with_input(BenchmarkId::new("workflow_node", size * 2), &dons, |b, d| {
            b.iter(|| black_box(peers(d, false, true, false, StreamConfig::default()).len()))
        });
        group.bench_with_input(BenchmarkId::new("dual_role_node", size * 2), &dons, |b, d| {
            b.iter(|| black_box(peers(d, true, true, false, StreamConfig::default()).len()))
        });
        group.bench_with_input(BenchmarkId::new("bootstrap", size * 2), &dons, |b, d| {
            b.iter(|| black_box(peers(d, false, false, true, StreamConfig::default()).len()))
        });
    }

    group.finish();
}

fn bench_don_pairs(c: &mut Criterion) {
    let mut group = c.benchmark_group("don-pairs");
    group.measurement_time(Duration::from_secs(5));

    for size in SIZES {
        let network = GeneratedNetwork::new(size, size, 16);
        let snapshot = network.snapshot();
        let dons = all_dons(&snapshot);
        let me = network.workflow_node();

        group.throughput(Throughput::Elements(u64::from(size * 2)));
        group.bench_with_input(BenchmarkId::new("member", size * 2), &dons, |b, d| {
            b.iter(|| black_box(don_pairs_to_update(d, &me, false).len()))
        });
        group.bench_with_input(BenchmarkId::new("bootstrap", size * 2), &dons, |b, d| {
            b.iter(|| black_box(don_pairs_to_update(d, &me, true).len()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_classification, bench_peer_set, bench_don_pairs);
criterion_main!(benches);
