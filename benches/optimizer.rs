//! Performance benchmarks for checkpoint selection and fingerprinting.
//!
//! Run with: `cargo bench --bench optimizer`
//!
//! ## Performance Targets
//!
//! | Operation | Target | Notes |
//! |-----------|--------|-------|
//! | Exact selection, 1000 operations | <50ms | Checkpoint latency budget |
//! | Fingerprint, 100k objects | <100ms | Recorded after every unit |

use std::collections::{BTreeMap, BTreeSet};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use elastic_checkpoint::fingerprint::{self, FingerprintLimits};
use elastic_checkpoint::{
    CostModel, DependencyGraph, FingerprintSummary, Heap, Object, OperationMeta, OutputState,
    Strategy,
};

/// History where each operation reads the previous two names and writes a
/// new one, with every tenth name rebound later.
fn make_graph(num_ops: usize) -> DependencyGraph {
    let mut graph = DependencyGraph::new();
    for i in 0..num_ops {
        let mut inputs = BTreeSet::new();
        for back in [1, 2] {
            if i >= back {
                inputs.insert(format!("v{}", i - back));
            }
        }
        let name = if i % 10 == 9 {
            format!("v{}", i - 5)
        } else {
            format!("v{i}")
        };
        let mut outputs = BTreeMap::new();
        outputs.insert(
            name,
            OutputState {
                size_bytes: ((i * 7919) % 50_000) as u64,
                fingerprint: FingerprintSummary {
                    content_hash: format!("{i:016x}"),
                    identity_count: 1,
                    unserializable: i % 97 == 0,
                },
            },
        );
        let runtime = ((i * 31) % 100) as f64 / 10.0;
        graph
            .record(
                OperationMeta::new(format!("cell {i}"), runtime),
                &inputs,
                outputs,
                &BTreeSet::new(),
            )
            .expect("valid operation");
    }
    graph
}

/// Benchmark selection strategies over growing histories.
fn bench_selection(c: &mut Criterion) {
    let cost = CostModel::new(100_000.0, 1.0).expect("valid cost model");
    let mut group = c.benchmark_group("selection");

    for num_ops in [10, 100, 1000] {
        let graph = make_graph(num_ops);
        let live = graph.live_ids();

        group.throughput(Throughput::Elements(num_ops as u64));
        for strategy in [Strategy::Exact, Strategy::MigrateAll, Strategy::RecomputeAll] {
            group.bench_with_input(
                BenchmarkId::new(strategy.to_string(), num_ops),
                &graph,
                |b, graph| b.iter(|| strategy.select(black_box(graph), &live, &cost)),
            );
        }
    }

    group.finish();
}

/// Benchmark fingerprinting a wide list of small records.
fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");

    for num_items in [1_000, 10_000, 100_000] {
        let mut heap = Heap::new();
        let items: Vec<_> = (0..num_items)
            .map(|i| {
                let value = heap.int(i as i64);
                let label = heap.str(format!("item-{i}"));
                heap.alloc(Object::Tuple(vec![value, label]))
            })
            .collect();
        let root = heap.list(items);

        group.throughput(Throughput::Elements(num_items as u64));
        group.bench_with_input(BenchmarkId::new("list", num_items), &heap, |b, heap| {
            b.iter(|| fingerprint::construct(black_box(heap), root, FingerprintLimits::default()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_selection, bench_fingerprint);
criterion_main!(benches);
