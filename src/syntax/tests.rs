use super::*;
use crate::graph::{OpKind, Shape};

fn build(source: &str) -> Built {
    let program = parse_source(source).unwrap();
    build_graph(&program).unwrap()
}

fn errors(source: &str) -> Vec<String> {
    match parse_source(source) {
        Err(diags) => diags.into_iter().map(|d| d.message).collect(),
        Ok(program) => build_graph(&program)
            .unwrap_err()
            .into_iter()
            .map(|d| d.message)
            .collect(),
    }
}

#[test]
fn test_parse_statements() {
    let program = parse_source("# header\narg x\n\narg v: [3]\nlet y = x * 2 # trailing\nout y\n").unwrap();
    assert_eq!(program.statements.len(), 4);
    assert!(matches!(
        &program.statements[1].node,
        Statement::Arg { name, dims } if name.node == "v" && dims == &vec![3]
    ));
}

#[test]
fn test_precedence() {
    let program = parse_source("out 1 + 2 * 3 < -4").unwrap();
    let Statement::Out(e) = &program.statements[0].node else {
        panic!("expected out");
    };
    let Expr::Binary { op: BinOp::Lt, lhs, rhs } = &e.node else {
        panic!("comparison binds loosest: {:?}", e.node);
    };
    assert!(matches!(lhs.node, Expr::Binary { op: BinOp::Add, .. }));
    assert!(matches!(rhs.node, Expr::Neg(_)));
}

#[test]
fn test_numbers() {
    let program = parse_source("out 1.5e2 + 0.25 + 3").unwrap();
    let text = format!("{:?}", program);
    assert!(text.contains("Number(150.0)"));
    assert!(text.contains("Number(0.25)"));
}

#[test]
fn test_static_and_dynamic_indexing() {
    let built = build("arg v: [3]\narg i\nout v[1]\nout v[i]\n");
    let ops: Vec<&OpKind> = built.outputs.iter().map(|&id| built.graph.node(id).unwrap().op()).collect();
    assert!(matches!(ops[0], OpKind::Extract(1)));
    assert!(matches!(ops[1], OpKind::Gather));
}

#[test]
fn test_calls_build_nodes() {
    let built = build("arg p: [2]\nlet r = sqrt(sum(p * p))\nout guard(r <= 1, r)\nout select(r > 0.5, [r, 1], [0, 0])\n");
    assert_eq!(built.outputs.len(), 2);
    assert_eq!(built.graph.shape_of(built.outputs[0]).unwrap(), &Shape::scalar());
    assert_eq!(built.graph.shape_of(built.outputs[1]).unwrap(), &Shape::vector(2));
}

#[test]
fn test_unknown_names_and_functions() {
    let errs = errors("arg x\nout x + y\nout frobnicate(x)\n");
    assert_eq!(
        errs,
        vec![
            "unknown name 'y'".to_string(),
            "unknown function 'frobnicate'".to_string()
        ]
    );
}

#[test]
fn test_rebinding_and_arity() {
    let errs = errors("arg x\nlet x = 1\nout pow(x)\n");
    assert_eq!(errs.len(), 2);
    assert!(errs[0].contains("already bound"));
    assert!(errs[1].contains("takes 2 argument(s), got 1"));
}

#[test]
fn test_shape_errors_carry_spans() {
    let source = "arg a: [2]\narg b: [3]\nout a + b\n";
    let diags = build_graph(&parse_source(source).unwrap()).unwrap_err();
    assert_eq!(diags.len(), 1);
    assert!(diags[0].message.starts_with("shape error"));
    assert_eq!(&source[diags[0].span.range()], "a + b");
}

#[test]
fn test_syntax_errors_recover_per_line() {
    let errs = errors("arg\nlet = 3\nout 1 $ 2\n");
    assert!(errs.iter().any(|m| m.contains("unexpected character '$'")));

    let errs = errors("arg\nlet = 3\nout (1\n");
    assert_eq!(errs.len(), 3);
    assert!(errs[0].contains("expected identifier"));
}

#[test]
fn test_program_without_outputs() {
    assert_eq!(errors("arg x\n"), vec!["program has no outputs".to_string()]);
}
