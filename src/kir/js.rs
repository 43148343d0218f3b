//! JavaScript dialect: a plain function looping over lanes (f64).

use super::{KernelDialect, KernelLayout};
use crate::graph::{format_float, BinaryOp, CompareOp, UnaryOp};

#[derive(Default)]
pub struct JsDialect;

impl JsDialect {
    pub fn new() -> Self {
        Self
    }
}

impl KernelDialect for JsDialect {
    fn target_name(&self) -> &str {
        "js"
    }

    fn header(&self, layout: &KernelLayout) -> Vec<String> {
        let mut params = vec!["_lanes".to_string()];
        for i in 0..layout.arguments {
            params.push(format!("_a{}", i));
            params.push(format!("_s{}", i));
        }
        params.push("_out".to_string());
        params.push("_status".to_string());
        vec![
            format!("function {}({}) {{", layout.name, params.join(", ")),
            "    for (let _lane = 0; _lane < _lanes; _lane++) {".to_string(),
            "        let _ok = 1;".to_string(),
        ]
    }

    fn footer(&self) -> Vec<String> {
        vec!["    }".to_string(), "}".to_string()]
    }

    fn body_depth(&self) -> usize {
        2
    }

    fn literal(&self, x: f64) -> String {
        if x.is_nan() {
            return "NaN".to_string();
        }
        if x.is_infinite() {
            return if x > 0.0 { "Infinity" } else { "(-Infinity)" }.to_string();
        }
        let text = format_float(x);
        if x.is_sign_negative() {
            format!("({})", text)
        } else {
            text
        }
    }

    fn declare_scalar(&self, name: &str, init: Option<&str>, mutable: bool) -> String {
        match (init, mutable) {
            (Some(v), false) => format!("const {} = {};", name, v),
            (Some(v), true) => format!("let {} = {};", name, v),
            (None, _) => format!("let {};", name),
        }
    }

    fn declare_array(&self, name: &str, size: usize, init: Option<&[String]>) -> String {
        match init {
            Some(items) => format!("const {} = [{}];", name, items.join(", ")),
            None => format!("const {} = new Array({});", name, size),
        }
    }

    fn unary(&self, op: UnaryOp, x: &str) -> String {
        match op {
            UnaryOp::Neg => format!("(-{})", x),
            other => format!("Math.{}({})", other.name(), x),
        }
    }

    fn binary(&self, op: BinaryOp, a: &str, b: &str) -> String {
        match op.infix() {
            Some(sym) => format!("({} {} {})", a, sym, b),
            None => format!("Math.{}({}, {})", op.name(), a, b),
        }
    }

    fn compare(&self, op: CompareOp, a: &str, b: &str) -> String {
        let sym = match op {
            CompareOp::Eq => "===",
            CompareOp::Ne => "!==",
            other => other.symbol(),
        };
        format!("(({} {} {}) ? 1.0 : 0.0)", a, sym, b)
    }

    fn clamp_index(&self, index: &str, len: usize) -> String {
        format!(
            "Math.trunc(Math.min(Math.max({}, 0.0), {}))",
            index,
            self.literal(len.saturating_sub(1) as f64)
        )
    }

    fn for_open(&self, counter: &str, extent: usize) -> String {
        format!(
            "for (let {} = 0.0; {} < {}; {} += 1.0) {{",
            counter,
            counter,
            self.literal(extent as f64),
            counter
        )
    }
}
