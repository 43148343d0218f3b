//! Intermediate representation between the computation graph and backends.
//!
//! A `Scope` is an ordered list of named declarations plus the argument
//! bindings it requires. Conditionals and reductions carry nested scopes
//! that bind the outer names they read as `Capture` arguments, so every
//! backend can choose its own control-flow strategy while honoring one
//! rule: evaluation order is declaration order.
//!
//! Pipeline:
//! ```text
//! Graph ─→ opt (graph passes) ─→ lower ─→ Scope ─→ opt (scope passes)
//!                                           ├→ interp      → Executable
//!                                           ├→ kir dialect → source text
//!                                           └→ tensor/gpu  → Executable
//! ```

pub mod lower;
pub mod naming;
pub mod validate;

#[cfg(test)]
mod tests;

use std::fmt;

use crate::error::{EngineError, Result};
use crate::graph::{self, format_float, BinaryOp, CompareOp, OpKind, ReduceOp, Shape, UnaryOp, Value};

pub use lower::lower;
pub use naming::NamingAuthority;
pub use validate::validate;

// ─── Expressions ──────────────────────────────────────────────────

/// A side-effect free expression over names bound earlier.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Ref(String),
    Literal(Value),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Compare(CompareOp, Box<Expr>, Box<Expr>),
    /// Static component of a rank-1 value.
    Extract(Box<Expr>, usize),
    /// Dynamic component of the flat element array; out of range leaves
    /// the lane undefined.
    Gather(Box<Expr>, Box<Expr>),
    Pack(Vec<Expr>),
}

impl Expr {
    pub fn name(name: impl Into<String>) -> Self {
        Expr::Ref(name.into())
    }

    /// Visit every name this expression reads, in evaluation order.
    pub fn for_each_ref<'a>(&'a self, f: &mut impl FnMut(&'a str)) {
        match self {
            Expr::Ref(name) => f(name),
            Expr::Literal(_) => {}
            Expr::Unary(_, x) | Expr::Extract(x, _) => x.for_each_ref(f),
            Expr::Binary(_, a, b) | Expr::Compare(_, a, b) | Expr::Gather(a, b) => {
                a.for_each_ref(f);
                b.for_each_ref(f);
            }
            Expr::Pack(items) => items.iter().for_each(|x| x.for_each_ref(f)),
        }
    }

    pub fn reads(&self, name: &str) -> usize {
        let mut n = 0;
        self.for_each_ref(&mut |r| {
            if r == name {
                n += 1;
            }
        });
        n
    }

    /// True when evaluating this expression can leave a lane undefined.
    pub fn may_fail(&self) -> bool {
        match self {
            Expr::Ref(_) | Expr::Literal(_) => false,
            Expr::Gather(..) => true,
            Expr::Unary(_, x) | Expr::Extract(x, _) => x.may_fail(),
            Expr::Binary(_, a, b) | Expr::Compare(_, a, b) => a.may_fail() || b.may_fail(),
            Expr::Pack(items) => items.iter().any(Expr::may_fail),
        }
    }

    /// Replace every read of `name` with `replacement`.
    pub fn substitute(&mut self, name: &str, replacement: &Expr) {
        match self {
            Expr::Ref(r) if r == name => *self = replacement.clone(),
            Expr::Ref(_) | Expr::Literal(_) => {}
            Expr::Unary(_, x) | Expr::Extract(x, _) => x.substitute(name, replacement),
            Expr::Binary(_, a, b) | Expr::Compare(_, a, b) | Expr::Gather(a, b) => {
                a.substitute(name, replacement);
                b.substitute(name, replacement);
            }
            Expr::Pack(items) => items.iter_mut().for_each(|x| x.substitute(name, replacement)),
        }
    }

    /// Infer the shape of this expression given the shapes of the names in scope.
    pub fn shape(&self, lookup: &impl Fn(&str) -> Option<Shape>) -> Result<Shape> {
        match self {
            Expr::Ref(name) => {
                lookup(name).ok_or_else(|| EngineError::compile(format!("unbound name '{}'", name)))
            }
            Expr::Literal(v) => Ok(v.shape().clone()),
            Expr::Unary(op, x) => graph::shape::infer(&OpKind::Unary(*op), &[&x.shape(lookup)?]),
            Expr::Binary(op, a, b) => graph::shape::infer(
                &OpKind::Binary(*op),
                &[&a.shape(lookup)?, &b.shape(lookup)?],
            ),
            Expr::Compare(op, a, b) => graph::shape::infer(
                &OpKind::Compare(*op),
                &[&a.shape(lookup)?, &b.shape(lookup)?],
            ),
            Expr::Extract(x, k) => graph::shape::infer(&OpKind::Extract(*k), &[&x.shape(lookup)?]),
            Expr::Gather(target, index) => {
                target.shape(lookup)?;
                let index = index.shape(lookup)?;
                if !index.is_scalar() {
                    return Err(EngineError::shape(format!(
                        "gather index must be a scalar, got {}",
                        index
                    )));
                }
                Ok(Shape::scalar())
            }
            Expr::Pack(items) => {
                let shapes = items
                    .iter()
                    .map(|x| x.shape(lookup))
                    .collect::<Result<Vec<_>>>()?;
                let refs: Vec<&Shape> = shapes.iter().collect();
                graph::shape::infer(&OpKind::Pack, &refs)
            }
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Ref(name) => write!(f, "{}", name),
            Expr::Literal(v) => write_literal(f, v),
            Expr::Unary(op, x) => write!(f, "{}({})", op.name(), x),
            Expr::Binary(op, a, b) => match op.infix() {
                Some(sym) => write!(f, "({} {} {})", a, sym, b),
                None => write!(f, "{}({}, {})", op.name(), a, b),
            },
            Expr::Compare(op, a, b) => write!(f, "({} {} {})", a, op.symbol(), b),
            Expr::Extract(x, k) => write!(f, "{}[{}]", x, k),
            Expr::Gather(x, i) => write!(f, "gather({}, {})", x, i),
            Expr::Pack(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

fn write_literal(f: &mut fmt::Formatter<'_>, v: &Value) -> fmt::Result {
    if v.shape().is_scalar() {
        return write!(f, "{}", format_float(v.element(0)));
    }
    let items: Vec<String> = v.data().iter().map(|x| format_float(*x)).collect();
    if v.shape().rank() == 1 {
        write!(f, "[{}]", items.join(", "))
    } else {
        write!(f, "literal({}; {})", v.shape(), items.join(", "))
    }
}

// ─── Bindings ─────────────────────────────────────────────────────

/// Where an argument of a scope gets its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgumentSource {
    /// Supplied by the caller at `position`; `label` is the graph name.
    External { position: usize, label: String },
    /// A name bound in the enclosing scope.
    Capture,
    /// Loop counter of the enclosing reduction.
    Counter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentBinding {
    pub name: String,
    pub shape: Shape,
    pub source: ArgumentSource,
}

impl ArgumentBinding {
    pub fn is_capture(&self) -> bool {
        self.source == ArgumentSource::Capture
    }
}

// ─── Declarations ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Let {
        name: String,
        shape: Shape,
        expr: Expr,
    },
    /// `value` when `cond != 0`, otherwise the lane is undefined.
    Guard {
        name: String,
        shape: Shape,
        cond: Expr,
        value: Expr,
    },
    /// Evaluates exactly one of the sub-scopes; each has one output.
    Branch {
        name: String,
        shape: Shape,
        cond: Expr,
        then_scope: Scope,
        else_scope: Scope,
    },
    /// Folds the body's single scalar output over counter values `0..extent`.
    Reduce {
        name: String,
        op: ReduceOp,
        extent: usize,
        body: Scope,
    },
}

impl Declaration {
    pub fn name(&self) -> &str {
        match self {
            Declaration::Let { name, .. }
            | Declaration::Guard { name, .. }
            | Declaration::Branch { name, .. }
            | Declaration::Reduce { name, .. } => name,
        }
    }

    pub fn shape(&self) -> Shape {
        match self {
            Declaration::Let { shape, .. }
            | Declaration::Guard { shape, .. }
            | Declaration::Branch { shape, .. } => shape.clone(),
            Declaration::Reduce { .. } => Shape::scalar(),
        }
    }

    /// Names of the enclosing scope this declaration reads: expression
    /// references plus the captures of nested scopes.
    pub fn for_each_read<'a>(&'a self, f: &mut impl FnMut(&'a str)) {
        match self {
            Declaration::Let { expr, .. } => expr.for_each_ref(f),
            Declaration::Guard { cond, value, .. } => {
                cond.for_each_ref(f);
                value.for_each_ref(f);
            }
            Declaration::Branch {
                cond,
                then_scope,
                else_scope,
                ..
            } => {
                cond.for_each_ref(f);
                then_scope.captures().for_each(|b| f(&b.name));
                else_scope.captures().for_each(|b| f(&b.name));
            }
            Declaration::Reduce { body, .. } => body.captures().for_each(|b| f(&b.name)),
        }
    }

    /// True when this declaration can leave a lane undefined.
    pub fn may_fail(&self) -> bool {
        match self {
            Declaration::Let { expr, .. } => expr.may_fail(),
            Declaration::Guard { .. } => true,
            Declaration::Branch {
                cond,
                then_scope,
                else_scope,
                ..
            } => cond.may_fail() || then_scope.may_fail() || else_scope.may_fail(),
            Declaration::Reduce { body, .. } => body.may_fail(),
        }
    }
}

// ─── Scope ────────────────────────────────────────────────────────

/// An ordered list of declarations with the arguments it requires.
///
/// Immutable once produced by lowering; passes return new scopes.
#[derive(Debug, Clone, PartialEq)]
pub struct Scope {
    pub name: String,
    pub arguments: Vec<ArgumentBinding>,
    pub declarations: Vec<Declaration>,
    pub outputs: Vec<String>,
}

impl Scope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
            declarations: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Caller-supplied arguments, ordered by position.
    pub fn externals(&self) -> Vec<&ArgumentBinding> {
        let mut ext: Vec<(usize, &ArgumentBinding)> = self
            .arguments
            .iter()
            .filter_map(|b| match &b.source {
                ArgumentSource::External { position, .. } => Some((*position, b)),
                _ => None,
            })
            .collect();
        ext.sort_by_key(|(p, _)| *p);
        ext.into_iter().map(|(_, b)| b).collect()
    }

    pub fn captures(&self) -> impl Iterator<Item = &ArgumentBinding> + '_ {
        self.arguments.iter().filter(|b| b.is_capture())
    }

    pub fn counter(&self) -> Option<&ArgumentBinding> {
        self.arguments
            .iter()
            .find(|b| b.source == ArgumentSource::Counter)
    }

    /// Shape of a name bound directly in this scope.
    pub fn shape_of(&self, name: &str) -> Option<Shape> {
        self.arguments
            .iter()
            .find(|b| b.name == name)
            .map(|b| b.shape.clone())
            .or_else(|| {
                self.declarations
                    .iter()
                    .find(|d| d.name() == name)
                    .map(Declaration::shape)
            })
    }

    pub fn output_shapes(&self) -> Result<Vec<Shape>> {
        self.outputs
            .iter()
            .map(|o| {
                self.shape_of(o).ok_or_else(|| {
                    EngineError::compile(format!("output '{}' of {} is not bound", o, self.name))
                })
            })
            .collect()
    }

    pub fn may_fail(&self) -> bool {
        self.declarations.iter().any(Declaration::may_fail)
    }

    /// Number of declarations, nested scopes included.
    pub fn declaration_count(&self) -> usize {
        self.declarations
            .iter()
            .map(|d| match d {
                Declaration::Branch {
                    then_scope,
                    else_scope,
                    ..
                } => 1 + then_scope.declaration_count() + else_scope.declaration_count(),
                Declaration::Reduce { body, .. } => 1 + body.declaration_count(),
                _ => 1,
            })
            .sum()
    }

    fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        writeln!(f, "{}scope {}", pad, self.name)?;
        for b in &self.arguments {
            match &b.source {
                ArgumentSource::External { position, label } => writeln!(
                    f,
                    "{}  arg {}: {} = external {} \"{}\"",
                    pad, b.name, b.shape, position, label
                )?,
                ArgumentSource::Capture => {
                    writeln!(f, "{}  arg {}: {} = capture", pad, b.name, b.shape)?
                }
                ArgumentSource::Counter => {
                    writeln!(f, "{}  arg {}: {} = counter", pad, b.name, b.shape)?
                }
            }
        }
        for d in &self.declarations {
            match d {
                Declaration::Let { name, shape, expr } => {
                    writeln!(f, "{}  let {}: {} = {}", pad, name, shape, expr)?
                }
                Declaration::Guard {
                    name,
                    shape,
                    cond,
                    value,
                } => writeln!(
                    f,
                    "{}  guard {}: {} = {} when {}",
                    pad, name, shape, value, cond
                )?,
                Declaration::Branch {
                    name,
                    shape,
                    cond,
                    then_scope,
                    else_scope,
                } => {
                    writeln!(f, "{}  branch {}: {} when {}", pad, name, shape, cond)?;
                    then_scope.write_indented(f, depth + 2)?;
                    else_scope.write_indented(f, depth + 2)?;
                }
                Declaration::Reduce {
                    name,
                    op,
                    extent,
                    body,
                } => {
                    writeln!(f, "{}  reduce {}: scalar = {} over {}", pad, name, op.name(), extent)?;
                    body.write_indented(f, depth + 2)?;
                }
            }
        }
        writeln!(f, "{}  out {}", pad, self.outputs.join(", "))
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_indented(f, 0)
    }
}
