use super::*;

#[test]
fn test_construction_order_is_topological() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let two = g.scalar(2.0);
    let y = g.mul(x, two).unwrap();
    for id in g.ids() {
        for input in g.node(id).unwrap().inputs() {
            assert!(input < &id);
        }
    }
    assert_eq!(g.len(), 3);
    assert_eq!(g.node(y).unwrap().inputs(), &[x, two]);
}

#[test]
fn test_shape_error_on_mismatch() {
    let mut g = Graph::new();
    let a = g.argument("a", Shape::vector(3)).unwrap();
    let b = g.argument("b", Shape::vector(2)).unwrap();
    let err = g.add(a, b).unwrap_err();
    assert!(matches!(err, EngineError::Shape(_)));
    // Failed applications leave the graph untouched.
    assert_eq!(g.len(), 2);
}

#[test]
fn test_unknown_input_is_rejected() {
    let mut g = Graph::new();
    let a = g.scalar(1.0);
    assert!(g.add(a, NodeId(99)).is_err());
}

#[test]
fn test_argument_redeclaration() {
    let mut g = Graph::new();
    let a = g.argument("x", Shape::vector(3)).unwrap();
    let b = g.argument("x", Shape::vector(3)).unwrap();
    assert_eq!(a, b);
    assert!(g.argument("x", Shape::scalar()).is_err());
}

#[test]
fn test_structural_hash_ignores_position() {
    let mut g1 = Graph::new();
    let x = g1.argument("x", Shape::scalar()).unwrap();
    let c = g1.scalar(3.0);
    let a = g1.add(x, c).unwrap();

    let mut g2 = Graph::new();
    let _noise = g2.scalar(42.0);
    let c2 = g2.scalar(3.0);
    let x2 = g2.argument("x", Shape::scalar()).unwrap();
    let b = g2.add(x2, c2).unwrap();

    assert!(structurally_equal(&g1, a, &g2, b));
    assert_ne!(a.index(), b.index());
}

#[test]
fn test_structural_hash_distinguishes_operands() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let y = g.argument("y", Shape::scalar()).unwrap();
    let a = g.sub(x, y).unwrap();
    let b = g.sub(y, x).unwrap();
    let c = g.sub(x, y).unwrap();
    assert_ne!(g.structural_hash(a).unwrap(), g.structural_hash(b).unwrap());
    assert_eq!(g.structural_hash(a).unwrap(), g.structural_hash(c).unwrap());
}

#[test]
fn test_literal_hash_is_bitwise() {
    let mut g = Graph::new();
    let a = g.scalar(0.0);
    let b = g.scalar(-0.0);
    let c = g.scalar(0.0);
    assert!(!structurally_equal(&g, a, &g, b));
    assert!(structurally_equal(&g, a, &g, c));
}

#[test]
fn test_apply_rejects_source_ops() {
    let mut g = Graph::new();
    assert!(g.apply(OpKind::Constant, &[]).is_err());
    assert!(g.apply(OpKind::Argument("x".into()), &[]).is_err());
}

#[test]
fn test_hash_display_forms() {
    let mut g = Graph::new();
    let a = g.scalar(1.0);
    let h = g.structural_hash(a).unwrap();
    assert_eq!(h.to_hex().len(), 64);
    assert_eq!(h.to_short().len(), 8);
    assert!(h.to_string().starts_with('#'));
}
