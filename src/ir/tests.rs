use super::*;
use crate::error::EngineError;

fn external(name: &str, position: usize, shape: Shape) -> ArgumentBinding {
    ArgumentBinding {
        name: name.into(),
        shape,
        source: ArgumentSource::External {
            position,
            label: name.into(),
        },
    }
}

fn let_(name: &str, expr: Expr) -> Declaration {
    Declaration::Let {
        name: name.into(),
        shape: Shape::scalar(),
        expr,
    }
}

fn add(a: Expr, b: Expr) -> Expr {
    Expr::Binary(BinaryOp::Add, Box::new(a), Box::new(b))
}

fn simple_scope() -> Scope {
    let mut s = Scope::new("k");
    s.arguments.push(external("x", 0, Shape::scalar()));
    s.declarations
        .push(let_("a", add(Expr::name("x"), Expr::Literal(Value::scalar(1.0)))));
    s.outputs.push("a".into());
    s
}

#[test]
fn test_valid_scope() {
    validate(&simple_scope()).unwrap();
}

#[test]
fn test_read_before_declaration_is_rejected() {
    let mut s = simple_scope();
    s.declarations.insert(0, let_("b", Expr::name("a")));
    let err = validate(&s).unwrap_err();
    assert!(matches!(err, EngineError::Compile(_)));
    assert!(err.to_string().contains("unbound name 'a'"), "{}", err);
}

#[test]
fn test_duplicate_names_are_rejected() {
    let mut s = simple_scope();
    s.declarations.push(let_("a", Expr::name("x")));
    assert!(validate(&s).unwrap_err().to_string().contains("duplicate"));
}

#[test]
fn test_duplicate_across_nested_scopes() {
    let mut s = simple_scope();
    let mut then_scope = Scope::new("t");
    then_scope.declarations.push(let_("a", Expr::name("x")));
    then_scope.arguments.push(ArgumentBinding {
        name: "x".into(),
        shape: Shape::scalar(),
        source: ArgumentSource::Capture,
    });
    then_scope.outputs.push("a".into());
    let mut else_scope = Scope::new("e");
    else_scope.declarations.push(let_("c", Expr::Literal(Value::scalar(0.0))));
    else_scope.outputs.push("c".into());
    s.declarations.push(Declaration::Branch {
        name: "br".into(),
        shape: Shape::scalar(),
        cond: Expr::name("x"),
        then_scope,
        else_scope,
    });
    assert!(validate(&s).unwrap_err().to_string().contains("duplicate name 'a'"));
}

#[test]
fn test_uncaptured_outer_read_is_rejected() {
    let mut s = simple_scope();
    let mut body = Scope::new("body");
    body.arguments.push(ArgumentBinding {
        name: "i".into(),
        shape: Shape::scalar(),
        source: ArgumentSource::Counter,
    });
    // Reads `a` from the enclosing scope without binding it.
    body.declarations.push(let_("e", add(Expr::name("a"), Expr::name("i"))));
    body.outputs.push("e".into());
    s.declarations.push(Declaration::Reduce {
        name: "r".into(),
        op: ReduceOp::Sum,
        extent: 4,
        body,
    });
    assert!(validate(&s).is_err());
}

#[test]
fn test_counter_outside_reduction_is_rejected() {
    let mut s = simple_scope();
    s.arguments.push(ArgumentBinding {
        name: "i".into(),
        shape: Shape::scalar(),
        source: ArgumentSource::Counter,
    });
    assert!(validate(&s).is_err());
}

#[test]
fn test_declared_shape_must_match() {
    let mut s = simple_scope();
    s.declarations.push(Declaration::Let {
        name: "p".into(),
        shape: Shape::scalar(),
        expr: Expr::Pack(vec![Expr::name("x"), Expr::name("a")]),
    });
    let err = validate(&s).unwrap_err();
    assert!(err.to_string().contains("declared scalar but computes [2]"), "{}", err);
}

#[test]
fn test_external_positions_must_be_dense() {
    let mut s = simple_scope();
    s.arguments.push(external("y", 2, Shape::scalar()));
    assert!(validate(&s).is_err());
}

#[test]
fn test_unbound_output_is_rejected() {
    let mut s = simple_scope();
    s.outputs.push("ghost".into());
    assert!(validate(&s).unwrap_err().to_string().contains("ghost"));
}

#[test]
fn test_expr_helpers() {
    let mut e = add(
        Expr::name("a"),
        Expr::Gather(Box::new(Expr::name("v")), Box::new(Expr::name("a"))),
    );
    assert_eq!(e.reads("a"), 2);
    assert!(e.may_fail());
    e.substitute("a", &Expr::Literal(Value::scalar(3.0)));
    assert_eq!(e.to_string(), "(3.0 + gather(v, 3.0))");
    assert_eq!(e.reads("a"), 0);
}

#[test]
fn test_expr_display_forms() {
    let e = Expr::Binary(
        BinaryOp::Max,
        Box::new(Expr::Extract(Box::new(Expr::name("p")), 1)),
        Box::new(Expr::Literal(Value::vector(vec![1.0, 0.5]))),
    );
    assert_eq!(e.to_string(), "max(p[1], [1.0, 0.5])");
    let c = Expr::Compare(CompareOp::Ne, Box::new(Expr::name("a")), Box::new(Expr::name("b")));
    assert_eq!(c.to_string(), "(a != b)");
}

#[test]
fn test_guard_makes_scope_fallible() {
    let mut s = simple_scope();
    assert!(!s.may_fail());
    s.declarations.push(Declaration::Guard {
        name: "g".into(),
        shape: Shape::scalar(),
        cond: Expr::name("a"),
        value: Expr::name("x"),
    });
    assert!(s.may_fail());
    assert_eq!(s.declaration_count(), 2);
}
