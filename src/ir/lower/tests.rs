use super::*;
use crate::graph::{CompareOp, ReduceOp, UnaryOp};
use crate::ir::validate;

fn lower_default(graph: &Graph, outputs: &[NodeId]) -> Scope {
    let mut names = NamingAuthority::new("v");
    lower(graph, outputs, &mut names).unwrap()
}

#[test]
fn test_lower_flat_graph() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let two = g.scalar(2.0);
    let y = g.mul(x, two).unwrap();

    let scope = lower_default(&g, &[y]);
    assert_eq!(
        scope.to_string(),
        "scope kernel_0\n\
         \x20 arg x: scalar = external 0 \"x\"\n\
         \x20 let v1: scalar = 2.0\n\
         \x20 let v2: scalar = (x * v1)\n\
         \x20 out v2\n"
    );
    validate(&scope).unwrap();
}

#[test]
fn test_lower_select_into_branch_scopes() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let zero = g.scalar(0.0);
    let cond = g.compare(CompareOp::Gt, x, zero).unwrap();
    let root = g.unary(UnaryOp::Sqrt, x).unwrap();
    let neg = g.unary(UnaryOp::Neg, x).unwrap();
    let s = g.select(cond, root, neg).unwrap();

    let scope = lower_default(&g, &[s]);
    let expected = [
        "scope kernel_0",
        "  arg x: scalar = external 0 \"x\"",
        "  let v1: scalar = 0.0",
        "  let v2: scalar = (x > v1)",
        "  branch v3: scalar when v2",
        "    scope v3_then",
        "      arg x: scalar = capture",
        "      let v4: scalar = sqrt(x)",
        "      out v4",
        "    scope v3_else",
        "      arg x: scalar = capture",
        "      let v5: scalar = neg(x)",
        "      out v5",
        "  out v3",
        "",
    ]
    .join("\n");
    assert_eq!(scope.to_string(), expected);
    validate(&scope).unwrap();
}

#[test]
fn test_lower_reduce_body() {
    let mut g = Graph::new();
    let v = g.argument("v", Shape::vector(3)).unwrap();
    let r = g.reduce(ReduceOp::Sum, v).unwrap();

    let scope = lower_default(&g, &[r]);
    let expected = [
        "scope kernel_0",
        "  arg v: [3] = external 0 \"v\"",
        "  reduce v1: scalar = sum over 3",
        "    scope v1_body",
        "      arg i_2: scalar = counter",
        "      arg v: [3] = capture",
        "      let v3: scalar = gather(v, i_2)",
        "      out v3",
        "  out v1",
        "",
    ]
    .join("\n");
    assert_eq!(scope.to_string(), expected);
    validate(&scope).unwrap();
}

#[test]
fn test_shared_node_is_declared_before_branch() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let sq = g.mul(x, x).unwrap();
    let one = g.scalar(1.0);
    let cond = g.compare(CompareOp::Lt, sq, one).unwrap();
    let s = g.select(cond, sq, one).unwrap();

    let scope = lower_default(&g, &[s]);
    // `sq` and `one` are forced by the condition, so both branches capture them.
    let Declaration::Branch {
        then_scope,
        else_scope,
        ..
    } = &scope.declarations[3]
    else {
        panic!("expected a branch, got {:?}", scope.declarations[3]);
    };
    assert!(then_scope.declarations.is_empty());
    assert!(else_scope.declarations.is_empty());
    assert_eq!(then_scope.captures().count(), 1);
    assert_eq!(then_scope.outputs, vec![scope.declarations[0].name().to_string()]);
    validate(&scope).unwrap();
}

#[test]
fn test_nested_branch_chains_captures() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let y = g.argument("y", Shape::scalar()).unwrap();
    let zero = g.scalar(0.0);
    let c1 = g.compare(CompareOp::Gt, x, zero).unwrap();
    let c2 = g.compare(CompareOp::Gt, y, zero).unwrap();
    let sum = g.add(x, y).unwrap();
    let inner = g.select(c2, sum, zero).unwrap();
    let outer = g.select(c1, inner, zero).unwrap();

    let scope = lower_default(&g, &[outer]);
    validate(&scope).unwrap();

    let Some(Declaration::Branch { then_scope, .. }) = scope.declarations.last() else {
        panic!("expected a trailing branch");
    };
    // The outer then-scope reads x and y for the inner branch, so it captures them.
    let captured: Vec<&str> = then_scope.captures().map(|b| b.name.as_str()).collect();
    assert!(captured.contains(&"x"));
    assert!(captured.contains(&"y"));
}

#[test]
fn test_unused_arguments_stay_bound_in_order() {
    let mut g = Graph::new();
    let _a = g.argument("a", Shape::scalar()).unwrap();
    let b = g.argument("b", Shape::vector(2)).unwrap();
    let e = g.extract(b, 1).unwrap();

    let scope = lower_default(&g, &[e]);
    let labels: Vec<String> = scope
        .externals()
        .iter()
        .map(|b| match &b.source {
            ArgumentSource::External { label, .. } => label.clone(),
            _ => unreachable!(),
        })
        .collect();
    assert_eq!(labels, vec!["a", "b"]);
}

#[test]
fn test_argument_names_are_claimed_safely() {
    let mut g = Graph::new();
    let a = g.argument("float", Shape::scalar()).unwrap();
    let b = g.argument("v1", Shape::scalar()).unwrap();
    let s = g.add(a, b).unwrap();

    let scope = lower_default(&g, &[s]);
    assert_eq!(scope.arguments[0].name, "float_1");
    assert_eq!(scope.arguments[1].name, "v1");
    validate(&scope).unwrap();
}

#[test]
fn test_output_may_be_an_argument() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let scope = lower_default(&g, &[x]);
    assert!(scope.declarations.is_empty());
    assert_eq!(scope.outputs, vec!["x"]);
    validate(&scope).unwrap();
}

#[test]
fn test_no_outputs_is_a_compile_error() {
    let g = Graph::new();
    let mut names = NamingAuthority::default();
    assert!(matches!(
        lower(&g, &[], &mut names),
        Err(EngineError::Compile(_))
    ));
}

#[test]
fn test_shared_authority_keeps_names_distinct() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let one = g.scalar(1.0);
    let y = g.add(x, one).unwrap();

    let mut names = NamingAuthority::new("v");
    let first = lower(&g, &[y], &mut names).unwrap();
    let second = lower(&g, &[y], &mut names).unwrap();
    assert_ne!(first.name, second.name);
    assert_ne!(first.arguments[0].name, second.arguments[0].name);
    for (a, b) in first.declarations.iter().zip(&second.declarations) {
        assert_ne!(a.name(), b.name());
    }
}
