//! WGSL compute-shader dialect (f32 only).
//!
//! Bindings: `_a{i}` read-only at `i`, then `_meta` (`[lanes, base,
//! stride0, stride1, ...]`), `_out` and `_status`. `base` offsets the
//! global id so a host can dispatch a long batch in chunks.

use super::{KernelDialect, KernelLayout};
use crate::graph::{BinaryOp, CompareOp, UnaryOp};

#[derive(Default)]
pub struct WgslDialect;

impl WgslDialect {
    pub fn new() -> Self {
        Self
    }
}

/// Binding index of `_meta` for a kernel with `arguments` inputs; `_out`
/// and `_status` follow it.
pub fn meta_binding(arguments: usize) -> u32 {
    arguments as u32
}

impl KernelDialect for WgslDialect {
    fn target_name(&self) -> &str {
        "wgsl"
    }

    fn header(&self, layout: &KernelLayout) -> Vec<String> {
        let mut out = Vec::new();
        for i in 0..layout.arguments {
            out.push(format!(
                "@group(0) @binding({}) var<storage, read> _a{}: array<f32>;",
                i, i
            ));
        }
        let meta = meta_binding(layout.arguments);
        out.push(format!(
            "@group(0) @binding({}) var<storage, read> _meta: array<u32>;",
            meta
        ));
        out.push(format!(
            "@group(0) @binding({}) var<storage, read_write> _out: array<f32>;",
            meta + 1
        ));
        out.push(format!(
            "@group(0) @binding({}) var<storage, read_write> _status: array<u32>;",
            meta + 2
        ));
        out.push(String::new());
        out.push(format!("@compute @workgroup_size({})", layout.workgroup_size));
        out.push(format!(
            "fn {}(@builtin(global_invocation_id) _gid: vec3<u32>) {{",
            layout.name
        ));
        out.push("    let _lane = _gid.x + _meta[1];".to_string());
        out.push("    if (_lane >= _meta[0]) {".to_string());
        out.push("        return;".to_string());
        out.push("    }".to_string());
        out.push("    var _ok: u32 = 1u;".to_string());
        out
    }

    fn footer(&self) -> Vec<String> {
        vec!["}".to_string()]
    }

    // Non-finite constants are rejected in WGSL const-expressions, so they
    // are derived from a storage read.
    fn prelude(&self) -> Vec<String> {
        vec![
            "let _inf = bitcast<f32>(0x7f800000u | (_meta[0] & 0u));".to_string(),
            "let _nan = bitcast<f32>(0x7fc00000u | (_meta[0] & 0u));".to_string(),
        ]
    }

    fn literal(&self, x: f64) -> String {
        let x = x as f32;
        if x.is_nan() {
            return "_nan".to_string();
        }
        if x.is_infinite() {
            return if x > 0.0 { "_inf" } else { "(-_inf)" }.to_string();
        }
        let text = if x.fract() == 0.0 && x.abs() < 1e7 {
            format!("{:.1}", x)
        } else {
            format!("{:?}", x)
        };
        if x.is_sign_negative() {
            format!("({})", text)
        } else {
            text
        }
    }

    fn uint(&self, n: usize) -> String {
        format!("{}u", n)
    }

    fn stride(&self, i: usize) -> String {
        format!("_meta[{}u]", i + 2)
    }

    fn declare_scalar(&self, name: &str, init: Option<&str>, mutable: bool) -> String {
        match (init, mutable) {
            (Some(v), false) => format!("let {}: f32 = {};", name, v),
            (Some(v), true) => format!("var {}: f32 = {};", name, v),
            (None, _) => format!("var {}: f32;", name),
        }
    }

    fn declare_array(&self, name: &str, size: usize, init: Option<&[String]>) -> String {
        let ty = format!("array<f32, {}>", size);
        match init {
            Some(items) => format!("var {}: {} = {}({});", name, ty, ty, items.join(", ")),
            None => format!("var {}: {};", name, ty),
        }
    }

    fn unary(&self, op: UnaryOp, x: &str) -> String {
        match op {
            UnaryOp::Neg => format!("(-{})", x),
            other => format!("{}({})", other.name(), x),
        }
    }

    fn binary(&self, op: BinaryOp, a: &str, b: &str) -> String {
        match op.infix() {
            Some(sym) => format!("({} {} {})", a, sym, b),
            None => format!("{}({}, {})", op.name(), a, b),
        }
    }

    fn compare(&self, op: CompareOp, a: &str, b: &str) -> String {
        format!("select(0.0, 1.0, {} {} {})", a, op.symbol(), b)
    }

    fn clamp_index(&self, index: &str, len: usize) -> String {
        format!(
            "u32(clamp({}, 0.0, {}))",
            index,
            self.literal(len.saturating_sub(1) as f64)
        )
    }

    fn for_open(&self, counter: &str, extent: usize) -> String {
        format!(
            "for (var {}: f32 = 0.0; {} < {}; {} += 1.0) {{",
            counter,
            counter,
            self.literal(extent as f64),
            counter
        )
    }

    fn ok_false(&self) -> &str {
        "0u"
    }
}
