//! OpenCL C dialect, in f64 (with `cl_khr_fp64`) or f32.

use super::{KernelDialect, KernelLayout};
use crate::config::Precision;
use crate::graph::{format_float, BinaryOp, CompareOp, UnaryOp};

pub struct OpenClDialect {
    precision: Precision,
}

impl OpenClDialect {
    pub fn new(precision: Precision) -> Self {
        Self { precision }
    }

    fn float_type(&self) -> &'static str {
        match self.precision {
            Precision::Double => "double",
            Precision::Single => "float",
        }
    }
}

impl KernelDialect for OpenClDialect {
    fn target_name(&self) -> &str {
        "opencl"
    }

    fn header(&self, layout: &KernelLayout) -> Vec<String> {
        let ty = self.float_type();
        let mut out = Vec::new();
        if self.precision == Precision::Double {
            out.push("#pragma OPENCL EXTENSION cl_khr_fp64 : enable".to_string());
            out.push(String::new());
        }
        let mut params: Vec<String> = (0..layout.arguments)
            .flat_map(|i| {
                [
                    format!("__global const {}* _a{}", ty, i),
                    format!("const int _s{}", i),
                ]
            })
            .collect();
        params.push(format!("__global {}* _out", ty));
        params.push("__global int* _status".to_string());
        params.push("const int _lanes".to_string());
        out.push(format!("__kernel void {}({})", layout.name, params.join(", ")));
        out.push("{".to_string());
        out.push("    const int _lane = get_global_id(0);".to_string());
        out.push("    if (_lane >= _lanes) return;".to_string());
        out.push("    int _ok = 1;".to_string());
        out
    }

    fn footer(&self) -> Vec<String> {
        vec!["}".to_string()]
    }

    fn literal(&self, x: f64) -> String {
        if x.is_nan() {
            return "NAN".to_string();
        }
        if x.is_infinite() {
            return if x > 0.0 { "INFINITY" } else { "(-INFINITY)" }.to_string();
        }
        let text = match self.precision {
            Precision::Double => format_float(x),
            Precision::Single => format!("{}f", format_float(x as f32 as f64)),
        };
        if x.is_sign_negative() {
            format!("({})", text)
        } else {
            text
        }
    }

    fn declare_scalar(&self, name: &str, init: Option<&str>, mutable: bool) -> String {
        let ty = self.float_type();
        match (init, mutable) {
            (Some(v), false) => format!("const {} {} = {};", ty, name, v),
            (Some(v), true) => format!("{} {} = {};", ty, name, v),
            (None, _) => format!("{} {};", ty, name),
        }
    }

    fn declare_array(&self, name: &str, size: usize, init: Option<&[String]>) -> String {
        let ty = self.float_type();
        match init {
            Some(items) => format!("{} {}[{}] = {{{}}};", ty, name, size, items.join(", ")),
            None => format!("{} {}[{}];", ty, name, size),
        }
    }

    fn unary(&self, op: UnaryOp, x: &str) -> String {
        match op {
            UnaryOp::Neg => format!("(-{})", x),
            UnaryOp::Abs => format!("fabs({})", x),
            other => format!("{}({})", other.name(), x),
        }
    }

    fn binary(&self, op: BinaryOp, a: &str, b: &str) -> String {
        if let Some(sym) = op.infix() {
            return format!("({} {} {})", a, sym, b);
        }
        match op {
            BinaryOp::Min => format!("fmin({}, {})", a, b),
            BinaryOp::Max => format!("fmax({}, {})", a, b),
            _ => format!("pow({}, {})", a, b),
        }
    }

    fn compare(&self, op: CompareOp, a: &str, b: &str) -> String {
        format!(
            "(({} {} {}) ? {} : {})",
            a,
            op.symbol(),
            b,
            self.literal(1.0),
            self.literal(0.0)
        )
    }

    fn clamp_index(&self, index: &str, len: usize) -> String {
        format!(
            "(int)fmin(fmax({}, {}), {})",
            index,
            self.literal(0.0),
            self.literal(len.saturating_sub(1) as f64)
        )
    }

    fn for_open(&self, counter: &str, extent: usize) -> String {
        format!(
            "for ({} {} = {}; {} < {}; {} += {}) {{",
            self.float_type(),
            counter,
            self.literal(0.0),
            counter,
            self.literal(extent as f64),
            counter,
            self.literal(1.0)
        )
    }
}
