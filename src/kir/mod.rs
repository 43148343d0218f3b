//! KIR: kernel source for data-parallel targets.
//!
//! A lowered scope becomes one kernel in which each invocation computes
//! one lane. The scope stays scalarized: vector values are small
//! fixed-size arrays and every elementwise operation is written out per
//! component. Dialects only decide spelling; [`KernelWriter`] owns the
//! structure shared by all of them.
//!
//! Kernel layout, per external argument `i`:
//! ```text
//! _a{i}      flat input buffer
//! stride i   elements to skip per lane (record size, or 0 when invariant)
//! _out       lanes × record_len outputs, all outputs concatenated
//! _status    1 when the lane is defined, 0 otherwise
//! ```

pub mod js;
pub mod opencl;
pub mod wgsl;

#[cfg(test)]
mod tests;

use std::collections::HashMap;

use tracing::debug;

use crate::backend::{Backend, Executable, Signature};
use crate::config::{Dialect, Policy, Precision};
use crate::error::{EngineError, Result};
use crate::graph::{BinaryOp, CompareOp, ReduceOp, Shape, UnaryOp};
use crate::ir::{self, Declaration, Expr, Scope};

pub use js::JsDialect;
pub use opencl::OpenClDialect;
pub use wgsl::WgslDialect;

/// What a dialect needs to write the kernel's entry point.
#[derive(Clone, Debug)]
pub struct KernelLayout {
    pub name: String,
    /// Number of external arguments, in position order.
    pub arguments: usize,
    /// Output elements per lane.
    pub record_len: usize,
    pub workgroup_size: u32,
}

/// Spelling of one kernel language.
pub trait KernelDialect: Send + Sync {
    /// The target name (e.g. "opencl", "wgsl", "js").
    fn target_name(&self) -> &str;

    /// Entry point up to and including the `_ok` declaration.
    fn header(&self, layout: &KernelLayout) -> Vec<String>;

    /// Closing lines after the status write.
    fn footer(&self) -> Vec<String>;

    /// Nesting depth of the lane body inside the entry point.
    fn body_depth(&self) -> usize {
        1
    }

    fn literal(&self, x: f64) -> String;

    /// Unsigned index literal.
    fn uint(&self, n: usize) -> String {
        n.to_string()
    }

    /// Per-lane stride of argument `i`.
    fn stride(&self, i: usize) -> String {
        format!("_s{}", i)
    }

    fn declare_scalar(&self, name: &str, init: Option<&str>, mutable: bool) -> String;

    fn declare_array(&self, name: &str, size: usize, init: Option<&[String]>) -> String;

    fn unary(&self, op: UnaryOp, x: &str) -> String;

    fn binary(&self, op: BinaryOp, a: &str, b: &str) -> String;

    /// Comparison yielding the dialect's 1.0 or 0.0.
    fn compare(&self, op: CompareOp, a: &str, b: &str) -> String;

    /// Integer element index from a float expression already known to be
    /// finite and in `[0, len)` on defined lanes.
    fn clamp_index(&self, index: &str, len: usize) -> String;

    /// Float loop over `0..extent` with `counter` as the loop variable.
    fn for_open(&self, counter: &str, extent: usize) -> String;

    /// Value `_ok` takes when the lane becomes undefined.
    fn ok_false(&self) -> &str {
        "0"
    }

    /// Lines placed right after the header (dialect-local constants).
    fn prelude(&self) -> Vec<String> {
        Vec::new()
    }

    fn indent(&self) -> &str {
        "    "
    }
}

/// Create the dialect for a policy, rejecting precisions it cannot honor.
pub fn create_dialect(policy: &Policy) -> Result<Box<dyn KernelDialect>> {
    match policy.dialect {
        Dialect::OpenCl => Ok(Box::new(OpenClDialect::new(policy.precision))),
        Dialect::Wgsl => {
            if policy.precision == Precision::Double {
                return Err(EngineError::compile(format!(
                    "policy '{}' asks for f64; WGSL has no double precision",
                    policy.name
                )));
            }
            Ok(Box::new(WgslDialect::new()))
        }
        Dialect::JavaScript => {
            if policy.precision == Precision::Single {
                return Err(EngineError::compile(format!(
                    "policy '{}' asks for f32; JavaScript numbers are f64",
                    policy.name
                )));
            }
            Ok(Box::new(JsDialect::new()))
        }
        other => Err(EngineError::config(format!(
            "dialect '{}' does not emit kernel source",
            other.name()
        ))),
    }
}

/// Emit the kernel for `scope` under `policy`.
pub fn emit_kernel(policy: &Policy, scope: &Scope) -> Result<String> {
    let dialect = create_dialect(policy)?;
    ir::validate(scope)?;
    let source = KernelWriter::new(dialect.as_ref(), scope).write(scope, policy.workgroup_size)?;
    debug!(
        target_name = dialect.target_name(),
        kernel = %scope.name,
        bytes = source.len(),
        "emitted kernel"
    );
    Ok(source)
}

// ─── Writer ───────────────────────────────────────────────────────

/// Writes one kernel, statement by statement, through a dialect.
pub struct KernelWriter<'a> {
    dialect: &'a dyn KernelDialect,
    shapes: HashMap<String, Shape>,
    lines: Vec<String>,
    /// Checks that must run before the statement being built.
    pending: Vec<String>,
    depth: usize,
    site: String,
}

fn collect_shapes(scope: &Scope, shapes: &mut HashMap<String, Shape>) {
    for b in &scope.arguments {
        shapes.insert(b.name.clone(), b.shape.clone());
    }
    for decl in &scope.declarations {
        shapes.insert(decl.name().to_string(), decl.shape());
        match decl {
            Declaration::Branch {
                then_scope,
                else_scope,
                ..
            } => {
                collect_shapes(then_scope, shapes);
                collect_shapes(else_scope, shapes);
            }
            Declaration::Reduce { body, .. } => collect_shapes(body, shapes),
            _ => {}
        }
    }
}

impl<'a> KernelWriter<'a> {
    pub fn new(dialect: &'a dyn KernelDialect, scope: &Scope) -> Self {
        let mut shapes = HashMap::new();
        collect_shapes(scope, &mut shapes);
        Self {
            dialect,
            shapes,
            lines: Vec::new(),
            pending: Vec::new(),
            depth: dialect.body_depth(),
            site: scope.name.clone(),
        }
    }

    pub fn write(mut self, scope: &Scope, workgroup_size: u32) -> Result<String> {
        let externals = scope.externals();
        let shapes = scope.output_shapes()?;
        let layout = KernelLayout {
            name: scope.name.clone(),
            arguments: externals.len(),
            record_len: shapes.iter().map(Shape::size).sum(),
            workgroup_size,
        };
        self.lines = self.dialect.header(&layout);
        for line in self.dialect.prelude() {
            self.line(line);
        }

        for (i, binding) in externals.iter().enumerate() {
            self.load(&binding.name, &binding.shape, i);
        }

        self.scope_body(scope)?;

        let mut offset = 0;
        for (name, shape) in scope.outputs.iter().zip(&shapes) {
            self.site = name.clone();
            for k in 0..shape.size() {
                let value = self.elem(&Expr::Ref(name.clone()), k)?;
                let slot = format!(
                    "_out[_lane * {} + {}]",
                    self.dialect.uint(layout.record_len),
                    self.dialect.uint(offset + k)
                );
                self.line(format!("{} = {};", slot, value));
            }
            offset += shape.size();
        }
        self.line("_status[_lane] = _ok;".to_string());

        let mut lines = self.lines;
        lines.extend(self.dialect.footer());
        let mut source = lines.join("\n");
        source.push('\n');
        Ok(source)
    }

    fn line(&mut self, text: String) {
        let indent = self.dialect.indent().repeat(self.depth);
        for check in std::mem::take(&mut self.pending) {
            self.lines.push(format!("{}{}", indent, check));
        }
        self.lines.push(format!("{}{}", indent, text));
    }

    fn load(&mut self, name: &str, shape: &Shape, i: usize) {
        let dialect = self.dialect;
        let stride = dialect.stride(i);
        let at = |k: usize| format!("_a{}[_lane * {} + {}]", i, stride, dialect.uint(k));
        let decl = if shape.is_scalar() {
            dialect.declare_scalar(name, Some(&at(0)), false)
        } else {
            let items: Vec<String> = (0..shape.size()).map(at).collect();
            dialect.declare_array(name, shape.size(), Some(&items))
        };
        self.line(decl);
    }

    fn shape(&self, name: &str) -> Result<&Shape> {
        self.shapes
            .get(name)
            .ok_or_else(|| EngineError::compile(format!("unbound name '{}'", name)))
    }

    fn is_true(&self, cond: &str) -> String {
        format!("({}) != {}", cond, self.dialect.literal(0.0))
    }

    fn fail_unless(&self, cond: &str) -> String {
        format!("if (!({})) {{ _ok = {}; }}", cond, self.dialect.ok_false())
    }

    /// Component `k` of `expr`; scalars broadcast.
    fn elem(&mut self, expr: &Expr, k: usize) -> Result<String> {
        Ok(match expr {
            Expr::Ref(name) => {
                if self.shape(name)?.is_scalar() {
                    name.clone()
                } else {
                    format!("{}[{}]", name, self.dialect.uint(k))
                }
            }
            Expr::Literal(v) => self.dialect.literal(v.element(k)),
            Expr::Unary(op, x) => {
                let x = self.elem(x, k)?;
                self.dialect.unary(*op, &x)
            }
            Expr::Binary(op, a, b) => {
                let a = self.elem(a, k)?;
                let b = self.elem(b, k)?;
                self.dialect.binary(*op, &a, &b)
            }
            Expr::Compare(op, a, b) => {
                let a = self.elem(a, k)?;
                let b = self.elem(b, k)?;
                self.dialect.compare(*op, &a, &b)
            }
            Expr::Extract(x, j) => self.elem(x, *j)?,
            Expr::Gather(x, i) => {
                let Expr::Ref(target) = x.as_ref() else {
                    return Err(EngineError::unsupported(
                        "gather of a computed vector",
                        self.site.clone(),
                    ));
                };
                let len = self.shape(target)?.size();
                let index = self.elem(i, 0)?;
                let in_range = format!(
                    "({}) >= {} && ({}) < {}",
                    index,
                    self.dialect.literal(0.0),
                    index,
                    self.dialect.literal(len as f64)
                );
                let check = self.fail_unless(&in_range);
                self.pending.push(check);
                if self.shape(target)?.is_scalar() {
                    target.clone()
                } else {
                    format!("{}[{}]", target, self.dialect.clamp_index(&index, len))
                }
            }
            Expr::Pack(items) => match items.get(k) {
                Some(item) => self.elem(item, 0)?,
                None => {
                    return Err(EngineError::shape(format!(
                        "component {} of a pack of {}",
                        k,
                        items.len()
                    )))
                }
            },
        })
    }

    fn scope_body(&mut self, scope: &Scope) -> Result<()> {
        for decl in &scope.declarations {
            self.site = decl.name().to_string();
            self.declaration(decl)?;
        }
        Ok(())
    }

    /// Declare `name` from `expr`, component by component.
    fn define(&mut self, name: &str, shape: &Shape, expr: &Expr, mutable: bool) -> Result<()> {
        if shape.is_scalar() {
            let value = self.elem(expr, 0)?;
            let decl = self.dialect.declare_scalar(name, Some(&value), mutable);
            self.line(decl);
        } else {
            let items = (0..shape.size())
                .map(|k| self.elem(expr, k))
                .collect::<Result<Vec<_>>>()?;
            let decl = self.dialect.declare_array(name, shape.size(), Some(&items));
            self.line(decl);
        }
        Ok(())
    }

    fn declaration(&mut self, decl: &Declaration) -> Result<()> {
        match decl {
            Declaration::Let { name, shape, expr } => self.define(name, shape, expr, false),
            Declaration::Guard {
                name,
                shape,
                cond,
                value,
            } => {
                let c = self.elem(cond, 0)?;
                let check = self.fail_unless(&self.is_true(&c));
                self.line(check);
                self.define(name, shape, value, false)
            }
            Declaration::Branch {
                name,
                shape,
                cond,
                then_scope,
                else_scope,
            } => {
                let uninit = if shape.is_scalar() {
                    self.dialect.declare_scalar(name, None, true)
                } else {
                    self.dialect.declare_array(name, shape.size(), None)
                };
                self.line(uninit);
                let c = self.elem(cond, 0)?;
                let open = format!("if ({}) {{", self.is_true(&c));
                self.line(open);
                self.arm(name, shape, then_scope)?;
                self.line("} else {".to_string());
                self.arm(name, shape, else_scope)?;
                self.line("}".to_string());
                Ok(())
            }
            Declaration::Reduce {
                name,
                op,
                extent,
                body,
            } => {
                let identity = self.dialect.literal(crate::graph::eval::reduce_identity(*op));
                let acc = self.dialect.declare_scalar(name, Some(&identity), true);
                self.line(acc);
                let counter = body
                    .counter()
                    .ok_or_else(|| EngineError::compile(format!("{} has no counter", name)))?;
                let open = self.dialect.for_open(&counter.name, *extent);
                self.line(open);
                self.depth += 1;
                self.scope_body(body)?;
                self.site = name.clone();
                let result = single_output(body)?;
                let step = match op {
                    ReduceOp::Sum => BinaryOp::Add,
                    ReduceOp::Product => BinaryOp::Mul,
                    ReduceOp::Max => BinaryOp::Max,
                    ReduceOp::Min => BinaryOp::Min,
                };
                let next = self.dialect.binary(step, name, result);
                self.line(format!("{} = {};", name, next));
                self.depth -= 1;
                self.line("}".to_string());
                Ok(())
            }
        }
    }

    /// One side of a branch: its declarations, then assignment of its result.
    fn arm(&mut self, name: &str, shape: &Shape, arm: &Scope) -> Result<()> {
        self.depth += 1;
        self.scope_body(arm)?;
        self.site = name.to_string();
        let result = Expr::Ref(single_output(arm)?.to_string());
        if shape.is_scalar() {
            let value = self.elem(&result, 0)?;
            self.line(format!("{} = {};", name, value));
        } else {
            for k in 0..shape.size() {
                let value = self.elem(&result, k)?;
                let slot = self.dialect.uint(k);
                self.line(format!("{}[{}] = {};", name, slot, value));
            }
        }
        self.depth -= 1;
        Ok(())
    }
}

fn single_output(scope: &Scope) -> Result<&str> {
    match scope.outputs.as_slice() {
        [one] => Ok(one),
        _ => Err(EngineError::compile(format!(
            "{} must have exactly one output",
            scope.name
        ))),
    }
}

// ─── Backend ──────────────────────────────────────────────────────

/// Backend for the textual dialects: executables carry source only.
pub struct SourceBackend {
    policy: Policy,
}

impl SourceBackend {
    pub fn new(policy: Policy) -> Self {
        Self { policy }
    }
}

impl Backend for SourceBackend {
    fn name(&self) -> &str {
        &self.policy.name
    }

    fn policy(&self) -> &Policy {
        &self.policy
    }

    fn deliver(&self, scope: &Scope) -> Result<Executable> {
        let source = emit_kernel(&self.policy, scope)?;
        Ok(Executable::source_only(
            &self.policy.name,
            Signature::of(scope)?,
            source,
        ))
    }
}
