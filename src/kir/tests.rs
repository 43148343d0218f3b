use super::*;
use crate::graph::{Graph, NodeId, Value};
use crate::ir::{lower, NamingAuthority};

fn scope_of(graph: &Graph, roots: &[NodeId]) -> Scope {
    lower(graph, roots, &mut NamingAuthority::default()).unwrap()
}

fn scaled() -> Scope {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let two = g.scalar(2.0);
    let y = g.mul(x, two).unwrap();
    scope_of(&g, &[y])
}

#[test]
fn test_js_kernel_text() {
    let source = emit_kernel(&Policy::javascript(), &scaled()).unwrap();
    let expected = [
        "function kernel_0(_lanes, _a0, _s0, _out, _status) {",
        "    for (let _lane = 0; _lane < _lanes; _lane++) {",
        "        let _ok = 1;",
        "        const x = _a0[_lane * _s0 + 0];",
        "        const v1 = 2.0;",
        "        const v2 = (x * v1);",
        "        _out[_lane * 1 + 0] = v2;",
        "        _status[_lane] = _ok;",
        "    }",
        "}",
        "",
    ]
    .join("\n");
    assert_eq!(source, expected);
}

#[test]
fn test_opencl_kernel_text() {
    let source = emit_kernel(&Policy::opencl(), &scaled()).unwrap();
    insta::assert_snapshot!(source.trim_end(), @r"
    #pragma OPENCL EXTENSION cl_khr_fp64 : enable

    __kernel void kernel_0(__global const double* _a0, const int _s0, __global double* _out, __global int* _status, const int _lanes)
    {
        const int _lane = get_global_id(0);
        if (_lane >= _lanes) return;
        int _ok = 1;
        const double x = _a0[_lane * _s0 + 0];
        const double v1 = 2.0;
        const double v2 = (x * v1);
        _out[_lane * 1 + 0] = v2;
        _status[_lane] = _ok;
    }
    ");
}

#[test]
fn test_opencl_single_precision_has_no_fp64_pragma() {
    let source = emit_kernel(&Policy::opencl_single(), &scaled()).unwrap();
    assert!(!source.contains("cl_khr_fp64"));
    assert!(source.contains("const float v1 = 2.0f;"));
    assert!(source.contains("__global float* _out"));
}

#[test]
fn test_wgsl_bindings_and_lane_offset() {
    let source = emit_kernel(&Policy::wgsl(), &scaled()).unwrap();
    assert!(source.contains("@group(0) @binding(0) var<storage, read> _a0: array<f32>;"));
    assert!(source.contains("@group(0) @binding(1) var<storage, read> _meta: array<u32>;"));
    assert!(source.contains("@group(0) @binding(3) var<storage, read_write> _status: array<u32>;"));
    assert!(source.contains("@compute @workgroup_size(64)"));
    assert!(source.contains("let _lane = _gid.x + _meta[1];"));
    assert!(source.contains("let x: f32 = _a0[_lane * _meta[2u] + 0u];"));
    assert!(source.contains("_out[_lane * 1u + 0u] = v2;"));
}

#[test]
fn test_precision_mismatch_is_a_compile_error() {
    let mut wide_wgsl = Policy::wgsl();
    wide_wgsl.precision = Precision::Double;
    assert!(matches!(
        emit_kernel(&wide_wgsl, &scaled()),
        Err(EngineError::Compile(_))
    ));

    let mut narrow_js = Policy::javascript();
    narrow_js.precision = Precision::Single;
    assert!(matches!(
        emit_kernel(&narrow_js, &scaled()),
        Err(EngineError::Compile(_))
    ));

    assert!(matches!(
        emit_kernel(&Policy::interpreter(), &scaled()),
        Err(EngineError::Config(_))
    ));
}

#[test]
fn test_gather_checks_range_before_reading() {
    let mut g = Graph::new();
    let v = g.argument("v", Shape::vector(3)).unwrap();
    let i = g.argument("i", Shape::scalar()).unwrap();
    let e = g.gather(v, i).unwrap();
    let source = emit_kernel(&Policy::javascript(), &scope_of(&g, &[e])).unwrap();

    let lines: Vec<&str> = source.lines().map(str::trim).collect();
    let check = lines
        .iter()
        .position(|l| *l == "if (!((i) >= 0.0 && (i) < 3.0)) { _ok = 0; }")
        .unwrap();
    assert_eq!(
        lines[check + 1],
        "const v1 = v[Math.trunc(Math.min(Math.max(i, 0.0), 2.0))];"
    );
    assert!(source.contains("const v = [_a0[_lane * _s0 + 0], _a0[_lane * _s0 + 1], _a0[_lane * _s0 + 2]];"));
}

#[test]
fn test_gather_of_computed_vector_is_unsupported() {
    let mut g = Graph::new();
    let v = g.argument("v", Shape::vector(2)).unwrap();
    let i = g.argument("i", Shape::scalar()).unwrap();
    let e = g.gather(v, i).unwrap();
    let mut scope = scope_of(&g, &[e]);
    let Declaration::Let { expr, .. } = &mut scope.declarations[0] else {
        panic!("expected a let");
    };
    *expr = Expr::Gather(
        Box::new(Expr::Literal(Value::vector(vec![1.0, 2.0]))),
        Box::new(Expr::name("i")),
    );
    let err = emit_kernel(&Policy::opencl(), &scope).unwrap_err();
    assert!(matches!(err, EngineError::Unsupported { ref site, .. } if site == "v1"));
}

#[test]
fn test_branch_assigns_both_arms() {
    let mut g = Graph::new();
    let x = g.argument("x", Shape::scalar()).unwrap();
    let zero = g.scalar(0.0);
    let cond = g.compare(CompareOp::Gt, x, zero).unwrap();
    let root = g.unary(UnaryOp::Sqrt, x).unwrap();
    let neg = g.unary(UnaryOp::Neg, x).unwrap();
    let s = g.select(cond, root, neg).unwrap();

    let source = emit_kernel(&Policy::opencl(), &scope_of(&g, &[s])).unwrap();
    let body: Vec<&str> = source
        .lines()
        .skip_while(|l| !l.contains("double v3;"))
        .take(8)
        .collect();
    assert_eq!(
        body,
        vec![
            "    double v3;",
            "    if ((v2) != 0.0) {",
            "        const double v4 = sqrt(x);",
            "        v3 = v4;",
            "    } else {",
            "        const double v5 = (-x);",
            "        v3 = v5;",
            "    }",
        ]
    );
    assert!(source.contains("const double v2 = ((x > v1) ? 1.0 : 0.0);"));
}

#[test]
fn test_reduce_loops_with_float_counter() {
    let mut g = Graph::new();
    let v = g.argument("v", Shape::vector(3)).unwrap();
    let m = g.reduce(crate::graph::ReduceOp::Max, v).unwrap();
    let source = emit_kernel(&Policy::wgsl(), &scope_of(&g, &[m])).unwrap();
    assert!(source.contains("var v1: f32 = (-_inf);"));
    assert!(source.contains("for (var i_2: f32 = 0.0; i_2 < 3.0; i_2 += 1.0) {"));
    assert!(source.contains("v1 = max(v1, v3);"));
    assert!(source.contains("var v: array<f32, 3> = array<f32, 3>("));
}

#[test]
fn test_literals_per_dialect() {
    let cl = OpenClDialect::new(Precision::Double);
    assert_eq!(cl.literal(-1.5), "(-1.5)");
    assert_eq!(cl.literal(f64::NAN), "NAN");
    assert_eq!(cl.literal(f64::NEG_INFINITY), "(-INFINITY)");
    assert_eq!(OpenClDialect::new(Precision::Single).literal(0.5), "0.5f");

    let wgsl = WgslDialect::new();
    assert_eq!(wgsl.literal(3.0), "3.0");
    assert_eq!(wgsl.literal(0.1), "0.1");
    assert_eq!(wgsl.literal(f64::INFINITY), "_inf");

    let js = JsDialect::new();
    assert_eq!(js.literal(f64::INFINITY), "Infinity");
    assert_eq!(js.literal(-2.0), "(-2.0)");
}

#[test]
fn test_source_backend_delivers_source_only() {
    let backend = SourceBackend::new(Policy::wgsl());
    let exe = backend.deliver(&scaled()).unwrap();
    assert_eq!(exe.backend(), "wgsl");
    assert!(!exe.is_runnable());
    assert!(exe.source().is_some_and(|s| s.contains("@compute")));
    assert_eq!(exe.signature().parameters.len(), 1);
}
