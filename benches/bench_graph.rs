use std::{sync::Arc, time::Duration};

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use deltagraph::{
    CommandCtx, Direction, Graph, GraphConfig, GraphContext, GraphError, QueryCtx, algo,
    query_ctx::ExecutionFlags,
};
use rand::{Rng, SeedableRng, rngs::StdRng};

const EDGE_SEED: u64 = 0xE7A1;
const SAMPLE_SIZE: usize = 20;
const WARM_UP: Duration = Duration::from_millis(300);
const MEASURE: Duration = Duration::from_millis(500);

fn bench_scales() -> &'static [u64] {
    #[cfg(feature = "bench-ci")]
    {
        &[1_000, 5_000]
    }
    #[cfg(not(feature = "bench-ci"))]
    {
        &[10_000, 50_000]
    }
}

/// Random graph with five outgoing edges per node spread over two relation types.
fn random_graph(nodes: u64, seed: u64) -> Graph {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut graph = Graph::new(nodes, nodes * 5, 10_000);
    let relations = [graph.add_relation_type(), graph.add_relation_type()];
    for _ in 0..nodes {
        graph.create_node(&[]).expect("node");
    }
    for src in 0..nodes {
        for _ in 0..5 {
            let dst = rng.gen_range(0..nodes);
            let rel = relations[rng.gen_range(0..2)];
            graph.create_edge(src, dst, rel).expect("edge");
        }
    }
    graph
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_build");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    for &nodes in bench_scales() {
        group.bench_function(BenchmarkId::from_parameter(nodes), |b| {
            b.iter(|| {
                let mut graph = random_graph(nodes, EDGE_SEED + nodes);
                graph.apply_all_pending(true);
                graph
            });
        });
    }
    group.finish();
}

fn bench_neighbors(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_neighbors");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    for &nodes in bench_scales() {
        let pending = random_graph(nodes, EDGE_SEED + nodes);
        let mut synced = pending.clone();
        synced.apply_all_pending(true);
        for (label, graph) in [("pending", &pending), ("synced", &synced)] {
            group.bench_function(BenchmarkId::new(label, nodes), |b| {
                b.iter(|| {
                    let mut total = 0usize;
                    for id in (0..nodes).step_by(11) {
                        total += graph
                            .neighbors(black_box(id), None, Direction::Both)
                            .expect("neighbors")
                            .count();
                    }
                    total
                });
            });
        }
    }
    group.finish();
}

fn bench_k_hop(c: &mut Criterion) {
    let mut group = c.benchmark_group("graph_k_hop");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    for &nodes in bench_scales() {
        let mut graph = random_graph(nodes, EDGE_SEED ^ nodes);
        graph.apply_all_pending(true);
        group.bench_function(BenchmarkId::from_parameter(nodes), |b| {
            b.iter(|| algo::k_hop(&graph, black_box(0), 2, Some(0), Direction::Outgoing).expect("k_hop"));
        });
    }
    group.finish();
}

fn bench_rollback(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_rollback");
    group.sample_size(SAMPLE_SIZE);
    group.warm_up_time(WARM_UP);
    group.measurement_time(MEASURE);
    for &nodes in bench_scales() {
        let config = GraphConfig::default()
            .with_node_capacity(nodes)
            .with_edge_capacity(nodes);
        let gc = GraphContext::new("bench", config).expect("graph context");
        group.bench_function(BenchmarkId::from_parameter(nodes), |b| {
            b.iter(|| {
                let command = CommandCtx::new("GRAPH.QUERY", "CREATE ...", Arc::clone(&gc));
                let mut ctx = QueryCtx::new(command).expect("ctx");
                ctx.set_flags(ExecutionFlags::WRITE).expect("flags");
                ctx.run(
                    |q| {
                        let mut prev = q.create_node(&["N"], &[])?;
                        for _ in 1..nodes / 10 {
                            let next = q.create_node(&["N"], &[])?;
                            q.create_edge(prev, next, "NEXT", &[])?;
                            prev = next;
                        }
                        Err(GraphError::invalid_input("rollback"))
                    },
                    |_| {},
                )
                .expect("run")
            });
        });
    }
    group.finish();
}

criterion_group!(
    name = graph_benches;
    config = Criterion::default();
    targets = bench_build, bench_neighbors, bench_k_hop, bench_rollback
);
criterion_main!(graph_benches);
