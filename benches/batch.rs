//! Lane throughput of batch execution: reference interpreter vs burn tensors.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use prism::backend::{Backend, InterpBackend, TensorBackend};
use prism::buffer::Buffer;
use prism::config::Policy;
use prism::graph::{CompareOp, Graph, Shape, UnaryOp};
use prism::ir::{lower, NamingAuthority};
use prism::kernel::{Kernel, LaneBinding, Sentinel};

/// Ray/sphere distance: a few arithmetic ops plus a guard.
fn sphere_kernel(backend: &dyn Backend) -> Kernel {
    let mut g = Graph::new();
    let b = g.argument("b", Shape::scalar()).unwrap();
    let one = g.scalar(1.0);
    let bb = g.mul(b, b).unwrap();
    let disc = g.sub(one, bb).unwrap();
    let zero = g.scalar(0.0);
    let hit = g.compare(CompareOp::Ge, disc, zero).unwrap();
    let root = g.unary(UnaryOp::Sqrt, disc).unwrap();
    let d = g.guard(hit, root).unwrap();
    let scope = lower(&g, &[d], &mut NamingAuthority::default()).unwrap();
    Kernel::new(Arc::new(backend.deliver(&scope).unwrap()), Sentinel::far())
}

fn bench_lanes(c: &mut Criterion) {
    let backends: Vec<Box<dyn Backend>> = vec![
        Box::new(InterpBackend::default()),
        Box::new(TensorBackend::new(Policy::tensor())),
    ];

    let mut group = c.benchmark_group("sphere_batch");
    for lanes in [1_000usize, 100_000] {
        let input = Buffer::from_vec(
            1,
            (0..lanes).map(|i| (i as f64 / lanes as f64) * 4.0 - 2.0).collect(),
        )
        .unwrap();
        group.throughput(Throughput::Elements(lanes as u64));
        for backend in &backends {
            let kernel = sphere_kernel(backend.as_ref());
            let mut out = Buffer::new(1, lanes);
            group.bench_with_input(BenchmarkId::new(backend.name(), lanes), &input, |b, input| {
                b.iter(|| {
                    kernel
                        .run(&[LaneBinding::Varying(black_box(input).view())], &mut [&mut out])
                        .unwrap()
                })
            });
        }
    }
    group.finish();
}

criterion_group!(benches, bench_lanes);
criterion_main!(benches);
