use std::sync::Arc;

use anyhow::Result;
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand::prelude::*;

use tensor_planner::{
    Allocator, CpuRuntime, DataType, Graph, MemoryStrategy, PlannerOptions, Runtime, TensorId,
    UnaryKind,
};

// =====================================================================
// Workloads
// =====================================================================

/// Random alloc/free sequence against a fresh allocator
fn allocator_churn(runtime: Arc<dyn Runtime>, seed: u64, ops: usize) -> Result<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut allocator = Allocator::new(runtime);
    let mut live: Vec<(usize, usize)> = Vec::new();

    for _ in 0..ops {
        if live.is_empty() || rng.gen_bool(0.6) {
            let size = rng.gen_range(1..4096);
            live.push((allocator.alloc(size)?, size));
        } else {
            let index = rng.gen_range(0..live.len());
            let (offset, size) = live.swap_remove(index);
            allocator.free(offset, size)?;
        }
    }
    Ok(allocator.high_water_mark())
}

/// Stack of transformer-ish blocks full of rewrite opportunities
fn build_block_graph(blocks: usize, strategy: MemoryStrategy) -> Result<Graph> {
    let options = PlannerOptions::new().set_memory_strategy(strategy);
    let mut graph = Graph::with_options(Arc::new(CpuRuntime::new()), options);

    let mut hidden: TensorId = graph.add_tensor(vec![8, 64, 64], DataType::Float32);
    for _ in 0..blocks {
        let weight = graph.add_tensor(vec![8, 64, 64], DataType::Float32);
        let swapped = graph.add_transpose(hidden, vec![1, 0, 2])?;
        let restored = graph.add_transpose(swapped, vec![1, 0, 2])?;
        let weight_t = graph.add_transpose(weight, vec![0, 2, 1])?;
        let projected = graph.add_matmul(restored, weight_t, false, false)?;
        let activated = graph.add_unary(UnaryKind::Relu, projected)?;
        hidden = graph.add_concat(&[activated, restored], 1)?;
        // [8, 128, 64] back to [8, 64, 64]
        let reduce = graph.add_tensor(vec![8, 128, 64], DataType::Float32);
        hidden = graph.add_matmul(hidden, reduce, true, false)?;
        hidden = graph.add_unary(UnaryKind::Tanh, hidden)?;
        hidden = graph.add_transpose(hidden, vec![0, 2, 1])?;
        hidden = graph.add_unary(UnaryKind::Sigmoid, hidden)?;
        hidden = graph.add_transpose(hidden, vec![0, 2, 1])?;
        let square = graph.add_tensor(vec![8, 64, 64], DataType::Float32);
        hidden = graph.add_matmul(hidden, square, false, false)?;
    }
    Ok(graph)
}

// =====================================================================
// Benchmarks
// =====================================================================

fn bench_allocator(c: &mut Criterion) {
    let runtime: Arc<dyn Runtime> = Arc::new(CpuRuntime::new());
    let mut group = c.benchmark_group("allocator");

    for &ops in &[256usize, 4096] {
        group.bench_with_input(BenchmarkId::new("churn", ops), &ops, |b, &ops| {
            b.iter(|| {
                let _ = black_box(allocator_churn(runtime.clone(), 42, ops));
            });
        });
    }

    group.finish();
}

fn bench_planning(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan");

    for &blocks in &[4usize, 32] {
        for strategy in [MemoryStrategy::Sequential, MemoryStrategy::LifetimeReuse] {
            if build_block_graph(blocks, strategy).is_err() {
                continue;
            }
            let id = BenchmarkId::new(strategy.to_string(), blocks);
            group.bench_with_input(id, &blocks, |b, &blocks| {
                b.iter_batched(
                    || build_block_graph(blocks, strategy).ok(),
                    |graph| graph.map(|mut graph| black_box(graph.plan().is_ok())),
                    BatchSize::SmallInput,
                );
            });
        }
    }

    group.finish();
}

fn bench_topo_sort(c: &mut Criterion) {
    let mut group = c.benchmark_group("topo_sort");

    for &blocks in &[4usize, 32] {
        group.bench_with_input(BenchmarkId::new("blocks", blocks), &blocks, |b, &blocks| {
            b.iter_batched(
                || build_block_graph(blocks, MemoryStrategy::Sequential).ok(),
                |graph| graph.map(|mut graph| black_box(graph.topo_sort())),
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_allocator, bench_planning, bench_topo_sort);
criterion_main!(benches);
