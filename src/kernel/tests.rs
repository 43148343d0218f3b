use super::*;
use crate::backend::{Backend, InterpBackend};
use crate::buffer::BufferArena;
use crate::graph::{CompareOp, Graph, NodeId, Shape, UnaryOp};
use crate::ir::{lower, NamingAuthority};

fn kernel_of(graph: &Graph, roots: &[NodeId], sentinel: Sentinel) -> Kernel {
    let scope = lower(graph, roots, &mut NamingAuthority::default()).unwrap();
    let exe = InterpBackend::default().deliver(&scope).unwrap();
    Kernel::new(Arc::new(exe), sentinel)
}

fn lanes(values: &[f64]) -> Buffer {
    Buffer::from_vec(1, values.to_vec()).unwrap()
}

#[test]
fn test_varying_and_invariant_bindings() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let k = g.argument("k", Shape::scalar()).unwrap();
    let y = g.mul(x, k).unwrap();
    let kernel = kernel_of(&g, &[y], Sentinel::default());

    let input = lanes(&[1.0, 2.0, 3.0]);
    let mut out = Buffer::new(1, 3);
    let report = kernel
        .run(
            &[LaneBinding::Varying(input.view()), LaneBinding::Invariant(Value::scalar(10.0))],
            &mut [&mut out],
        )
        .unwrap();
    assert_eq!(report, KernelReport { lanes: 3, undefined: 0 });
    assert_eq!(out.as_slice(), &[10.0, 20.0, 30.0]);
}

#[test]
fn test_guard_failure_writes_sentinel() {
    // Distance to a unit sphere along x, undefined when the ray misses.
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let one = g.scalar(1.0);
    let sq = g.mul(x, x).unwrap();
    let rest = g.sub(one, sq).unwrap();
    let zero = g.scalar(0.0);
    let hit = g.compare(CompareOp::Ge, rest, zero).unwrap();
    let root = g.unary(UnaryOp::Sqrt, rest).unwrap();
    let d = g.guard(hit, root).unwrap();
    let kernel = kernel_of(&g, &[d], Sentinel::far());

    let input = lanes(&[0.0, 2.0, 0.6, -3.0]);
    let mut out = Buffer::new(1, 4);
    let report = kernel
        .run(&[LaneBinding::Varying(input.view())], &mut [&mut out])
        .unwrap();
    assert_eq!(report.undefined, 2);
    assert_eq!(report.defined(), 2);
    assert_eq!(out.get(0).unwrap(), &[1.0]);
    assert_eq!(out.get(1).unwrap(), &[f64::MAX]);
    assert!((out.get(2).unwrap()[0] - 0.8).abs() < 1e-12);
    assert_eq!(out.get(3).unwrap(), &[f64::MAX]);
}

#[test]
fn test_non_finite_results_can_be_rejected() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let one = g.scalar(1.0);
    let y = g.div(one, x).unwrap();
    let input = lanes(&[2.0, 0.0]);

    let mut out = Buffer::new(1, 2);
    let lenient = kernel_of(&g, &[y], Sentinel::new(-1.0));
    lenient.run(&[LaneBinding::Varying(input.view())], &mut [&mut out]).unwrap();
    assert_eq!(out.as_slice(), &[0.5, f64::INFINITY]);

    let strict = kernel_of(&g, &[y], Sentinel::new(-1.0).with_non_finite(true));
    let report = strict.run(&[LaneBinding::Varying(input.view())], &mut [&mut out]).unwrap();
    assert_eq!(report.undefined, 1);
    assert_eq!(out.as_slice(), &[0.5, -1.0]);
}

#[test]
fn test_multiple_outputs_split_or_packed() {
    let mut g = Graph::new();
    let p = g.argument("p", Shape::vector(2)).unwrap();
    let a = g.extract(p, 0).unwrap();
    let b = g.extract(p, 1).unwrap();
    let s = g.add(a, b).unwrap();
    let kernel = kernel_of(&g, &[s, p], Sentinel::default());

    let input = Buffer::from_vec(2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    let mut sums = Buffer::new(1, 2);
    let mut copies = Buffer::new(2, 2);
    kernel
        .run(&[LaneBinding::Varying(input.view())], &mut [&mut sums, &mut copies])
        .unwrap();
    assert_eq!(sums.as_slice(), &[3.0, 7.0]);
    assert_eq!(copies.as_slice(), input.as_slice());

    let mut packed = Buffer::new(3, 2);
    kernel
        .run(&[LaneBinding::Varying(input.view())], &mut [&mut packed])
        .unwrap();
    assert_eq!(packed.as_slice(), &[3.0, 1.0, 2.0, 7.0, 3.0, 4.0]);
}

#[test]
fn test_mismatched_buffers_are_argument_errors() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let y = g.argument("y", Shape::scalar()).unwrap();
    let s = g.add(x, y).unwrap();
    let kernel = kernel_of(&g, &[s], Sentinel::default());

    let three = lanes(&[1.0, 2.0, 3.0]);
    let two = lanes(&[1.0, 2.0]);
    let mut out = Buffer::new(1, 3);
    let err = kernel
        .run(
            &[LaneBinding::Varying(three.view()), LaneBinding::Varying(two.view())],
            &mut [&mut out],
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Argument(_)));

    let mut short = Buffer::new(1, 2);
    let err = kernel
        .run(
            &[LaneBinding::Varying(three.view()), LaneBinding::Varying(three.view())],
            &mut [&mut short],
        )
        .unwrap_err();
    assert!(matches!(err, EngineError::Argument(_)));
}

#[test]
fn test_disposed_executable_surfaces() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let kernel = kernel_of(&g, &[x], Sentinel::default());
    kernel.executable().dispose();
    let input = lanes(&[1.0]);
    let mut out = Buffer::new(1, 1);
    let err = kernel
        .run(&[LaneBinding::Varying(input.view())], &mut [&mut out])
        .unwrap_err();
    assert!(matches!(err, EngineError::Usage(_)));
}

#[test]
fn test_views_run_over_part_of_a_buffer() {
    let mut g = Graph::new();
    let p = g.argument("p", Shape::vector(2)).unwrap();
    let a = g.extract(p, 0).unwrap();
    let b = g.extract(p, 1).unwrap();
    let s = g.mul(a, b).unwrap();
    let kernel = kernel_of(&g, &[s], Sentinel::default());

    // Six scalars seen as three pairs; only the last two pairs run.
    let flat = lanes(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    let pairs = flat.view().reshape(2).unwrap().range(1, 2).unwrap();
    let mut out = Buffer::new(1, 4);
    out.fill(-1.0);
    let window = out.view_mut().range(2, 2).unwrap();
    let report = kernel
        .run_views(&[LaneBinding::Varying(pairs)], &mut [window])
        .unwrap();
    assert_eq!(report.lanes, 2);
    assert_eq!(out.as_slice(), &[-1.0, -1.0, 12.0, 30.0]);
}

fn scale_kernel(factor: f64) -> Kernel {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let k = g.scalar(factor);
    let y = g.mul(x, k).unwrap();
    kernel_of(&g, &[y], Sentinel::default())
}

#[test]
fn test_operation_list_feeds_later_steps() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let y = g.argument("y", Shape::scalar()).unwrap();
    let s = g.add(x, y).unwrap();
    let add = kernel_of(&g, &[s], Sentinel::default());

    let mut arena = BufferArena::new();
    let input = arena.alloc(1, 3);
    arena.get_mut(input).unwrap().as_mut_slice().copy_from_slice(&[1.0, 2.0, 3.0]);
    let doubled = arena.alloc(1, 3);
    let total = arena.alloc(1, 3);

    let mut list = OperationList::new();
    list.add(scale_kernel(2.0), vec![StepInput::Buffer(input)], vec![doubled])
        .unwrap()
        .add(
            add,
            vec![StepInput::Buffer(doubled), StepInput::Value(Value::scalar(0.5))],
            vec![total],
        )
        .unwrap();
    assert_eq!(list.len(), 2);

    let reports = list.run(&mut arena).unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!(arena.get(doubled).unwrap().as_slice(), &[2.0, 4.0, 6.0]);
    assert_eq!(arena.get(total).unwrap().as_slice(), &[2.5, 4.5, 6.5]);
}

#[test]
fn test_operation_list_rejects_aliasing_and_arity() {
    let mut arena = BufferArena::new();
    let a = arena.alloc(1, 2);
    let mut list = OperationList::new();
    let err = list
        .add(scale_kernel(2.0), vec![StepInput::Buffer(a)], vec![a])
        .err()
        .unwrap();
    assert!(matches!(err, EngineError::Argument(_)));
    let err = list.add(scale_kernel(2.0), vec![], vec![a]).err().unwrap();
    assert!(matches!(err, EngineError::Argument(_)));
    assert!(list.is_empty());
}

#[test]
fn test_operation_list_stops_at_stale_buffer() {
    let mut arena = BufferArena::new();
    let input = arena.alloc(1, 2);
    let first = arena.alloc(1, 2);
    let gone = arena.alloc(1, 2);
    let second = arena.alloc(1, 2);
    arena.get_mut(input).unwrap().fill(3.0);

    let mut list = OperationList::new();
    list.add(scale_kernel(2.0), vec![StepInput::Buffer(input)], vec![first])
        .unwrap()
        .add(scale_kernel(2.0), vec![StepInput::Buffer(first)], vec![second, gone])
        .unwrap();
    arena.free(gone).unwrap();

    let err = list.run(&mut arena).unwrap_err();
    assert!(matches!(err, EngineError::Resource(_)));
    assert_eq!(arena.get(first).unwrap().as_slice(), &[6.0, 6.0]);
    // Outputs checked out before the failure are back in place, untouched.
    assert_eq!(arena.get(second).unwrap().as_slice(), &[0.0, 0.0]);
}
