use super::*;
use crate::graph::{CompareOp, Shape, Value};
use crate::ir::{lower, validate, Declaration, Expr, NamingAuthority};

fn lowered(graph: &Graph, roots: &[NodeId]) -> Scope {
    lower(graph, roots, &mut NamingAuthority::default()).unwrap()
}

#[test]
fn test_constant_sum_folds_to_one_literal() {
    let mut g = Graph::new();
    let a = g.scalar(2.0);
    let b = g.scalar(3.0);
    let s = g.add(a, b).unwrap();

    let (opt, roots) = optimize(&g, &[s], Precision::Double).unwrap();
    assert_eq!(opt.len(), 1);
    assert_eq!(opt.node(roots[0]).unwrap().literal(), Some(&Value::scalar(5.0)));
}

#[test]
fn test_folding_rounds_at_target_precision() {
    let mut g = Graph::new();
    let big = g.scalar(1e8);
    let one = g.scalar(1.0);
    let sum = g.add(big, one).unwrap();
    let back = g.sub(sum, big).unwrap();

    let (wide, roots) = optimize(&g, &[back], Precision::Double).unwrap();
    assert_eq!(wide.node(roots[0]).unwrap().literal(), Some(&Value::scalar(1.0)));
    let (narrow, roots) = optimize(&g, &[back], Precision::Single).unwrap();
    assert_eq!(narrow.node(roots[0]).unwrap().literal(), Some(&Value::scalar(0.0)));
}

#[test]
fn test_cse_merges_identical_subtrees() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let a = g.mul(x, x).unwrap();
    let b = g.mul(x, x).unwrap();
    let s = g.add(a, b).unwrap();

    let (opt, roots) = optimize(&g, &[s], Precision::Double).unwrap();
    assert_eq!(opt.len(), 3);
    let sum = opt.node(roots[0]).unwrap();
    assert_eq!(sum.inputs()[0], sum.inputs()[1]);
}

#[test]
fn test_failing_guard_is_not_folded() {
    let mut g = Graph::new();
    let zero = g.scalar(0.0);
    let one = g.scalar(1.0);
    let guarded = g.guard(zero, one).unwrap();

    let (opt, roots) = optimize(&g, &[guarded], Precision::Double).unwrap();
    assert!(matches!(opt.node(roots[0]).unwrap().op(), OpKind::Guard));
}

#[test]
fn test_passing_guard_folds_away() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let one = g.scalar(1.0);
    let guarded = g.guard(one, x).unwrap();

    let (opt, roots) = optimize(&g, &[guarded], Precision::Double).unwrap();
    assert!(matches!(opt.node(roots[0]).unwrap().op(), OpKind::Argument(_)));
}

#[test]
fn test_out_of_range_gather_is_not_folded() {
    let mut g = Graph::new();
    let v = g.constant(Value::vector(vec![1.0, 2.0]));
    let idx = g.scalar(5.0);
    let e = g.gather(v, idx).unwrap();
    let (opt, roots) = optimize(&g, &[e], Precision::Double).unwrap();
    assert!(matches!(opt.node(roots[0]).unwrap().op(), OpKind::Gather));
}

#[test]
fn test_literal_select_picks_branch() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let y = g.argument("y", Shape::scalar()).unwrap();
    let zero = g.scalar(0.0);
    let s = g.select(zero, x, y).unwrap();

    let (opt, roots) = optimize(&g, &[s], Precision::Double).unwrap();
    assert_eq!(opt.node(roots[0]).unwrap().op(), &OpKind::Argument("y".into()));
}

#[test]
fn test_arguments_survive_even_when_unused() {
    let mut g = Graph::new();
    let _a = g.argument("a", Shape::scalar()).unwrap();
    let b = g.argument("b", Shape::scalar()).unwrap();
    let _dead = g.scalar(9.0);

    let (opt, _) = optimize(&g, &[b], Precision::Double).unwrap();
    let names: Vec<&str> = opt.arguments().map(|(_, n, _)| n).collect();
    assert_eq!(names, vec!["a", "b"]);
    assert_eq!(opt.len(), 2);
}

#[test]
fn test_optimize_is_idempotent() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::vector(3)).unwrap();
    let two = g.scalar(2.0);
    let three = g.scalar(3.0);
    let five = g.add(two, three).unwrap();
    let scaled = g.mul(x, five).unwrap();
    let again = g.mul(x, five).unwrap();
    let s = g.sub(scaled, again).unwrap();

    let (once, r1) = optimize(&g, &[s], Precision::Double).unwrap();
    let (twice, r2) = optimize(&once, &r1, Precision::Double).unwrap();
    assert_eq!(once.len(), twice.len());
    for (a, b) in once.ids().zip(twice.ids()) {
        assert_eq!(once.structural_hash(a).unwrap(), twice.structural_hash(b).unwrap());
    }
    assert_eq!(r1, r2);
}

#[test]
fn test_o0_is_a_no_op() {
    let mut g = Graph::new();
    let a = g.scalar(2.0);
    let b = g.scalar(3.0);
    let s = g.add(a, b).unwrap();
    let pm = PassManager::for_level(OptLevel::O0, Precision::Double);
    assert!(pm.pass_names().is_empty());
    let (out, roots) = pm.run(&g, &[s]).unwrap();
    assert_eq!(out.len(), 3);
    assert_eq!(roots, vec![s]);
}

#[test]
fn test_dead_declarations_and_captures_are_dropped() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let one = g.scalar(1.0);
    let y = g.add(x, one).unwrap();
    let scope = lowered(&g, &[y]);

    // Append an unread declaration by hand.
    let mut padded = scope.clone();
    padded.declarations.push(Declaration::Let {
        name: "unused".into(),
        shape: Shape::scalar(),
        expr: Expr::name("x"),
    });
    let compacted = eliminate_dead_bindings(&padded);
    assert_eq!(compacted, scope);
}

#[test]
fn test_dce_keeps_guards() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let mut scope = lowered(&g, &[x]);
    scope.declarations.push(Declaration::Guard {
        name: "g".into(),
        shape: Shape::scalar(),
        cond: Expr::name("x"),
        value: Expr::name("x"),
    });
    let compacted = eliminate_dead_bindings(&scope);
    assert_eq!(compacted.declarations.len(), 1);
}

#[test]
fn test_inline_single_use_chain() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let one = g.scalar(1.0);
    let a = g.add(x, one).unwrap();
    let two = g.scalar(2.0);
    let b = g.mul(a, two).unwrap();

    let scope = compact_scope(&lowered(&g, &[b]), OptLevel::O2);
    assert_eq!(scope.declarations.len(), 1);
    let Declaration::Let { expr, .. } = &scope.declarations[0] else {
        panic!("expected a let");
    };
    assert_eq!(expr.to_string(), "((x + 1.0) * 2.0)");
    validate(&scope).unwrap();
}

#[test]
fn test_inline_skips_shared_and_vector_values() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let sq = g.mul(x, x).unwrap();
    let p = g.pack(&[sq, x]).unwrap();
    let cond = g.compare(CompareOp::Gt, sq, x).unwrap();

    let scope = lowered(&g, &[p, cond]);
    let inlined = inline_single_use(&scope);
    // `sq` is read twice, so it stays.
    assert_eq!(inlined, scope);
}

#[test]
fn test_compact_scope_is_idempotent() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let one = g.scalar(1.0);
    let c = g.compare(CompareOp::Lt, x, one).unwrap();
    let neg = g.sub(one, x).unwrap();
    let s = g.select(c, neg, x).unwrap();

    let once = compact_scope(&lowered(&g, &[s]), OptLevel::O2);
    let twice = compact_scope(&once, OptLevel::O2);
    assert_eq!(once, twice);
    validate(&once).unwrap();
}
