//! Program → Graph.

use std::collections::HashMap;

use tracing::debug;

use super::{BinOp, Expr, Program, Statement};
use crate::diagnostic::Diagnostic;
use crate::error::EngineError;
use crate::graph::{BinaryOp, CompareOp, Graph, NodeId, ReduceOp, Shape, UnaryOp};
use crate::span::{Span, Spanned};

/// A graph built from source plus its outputs in `out` order.
#[derive(Debug)]
pub struct Built {
    pub graph: Graph,
    pub outputs: Vec<NodeId>,
}

enum Callee {
    Unary(UnaryOp),
    Binary(BinaryOp),
    Reduce(ReduceOp),
    Select,
    Guard,
}

const FUNCTIONS: &[&str] = &[
    "sqrt", "exp", "log", "sin", "cos", "abs", "floor", "min", "max", "pow", "sum", "prod",
    "maxof", "minof", "select", "guard",
];

fn callee(name: &str) -> Option<(Callee, usize)> {
    let entry = match name {
        "sqrt" => (Callee::Unary(UnaryOp::Sqrt), 1),
        "exp" => (Callee::Unary(UnaryOp::Exp), 1),
        "log" => (Callee::Unary(UnaryOp::Log), 1),
        "sin" => (Callee::Unary(UnaryOp::Sin), 1),
        "cos" => (Callee::Unary(UnaryOp::Cos), 1),
        "abs" => (Callee::Unary(UnaryOp::Abs), 1),
        "floor" => (Callee::Unary(UnaryOp::Floor), 1),
        "min" => (Callee::Binary(BinaryOp::Min), 2),
        "max" => (Callee::Binary(BinaryOp::Max), 2),
        "pow" => (Callee::Binary(BinaryOp::Pow), 2),
        "sum" => (Callee::Reduce(ReduceOp::Sum), 1),
        "prod" => (Callee::Reduce(ReduceOp::Product), 1),
        "maxof" => (Callee::Reduce(ReduceOp::Max), 1),
        "minof" => (Callee::Reduce(ReduceOp::Min), 1),
        "select" => (Callee::Select, 3),
        "guard" => (Callee::Guard, 2),
        _ => return None,
    };
    Some(entry)
}

struct Builder {
    graph: Graph,
    scope: HashMap<String, NodeId>,
    diagnostics: Vec<Diagnostic>,
}

/// Build the graph of a parsed program. Every error is reported, not just
/// the first.
pub fn build_graph(program: &Program) -> Result<Built, Vec<Diagnostic>> {
    let mut b = Builder {
        graph: Graph::new(),
        scope: HashMap::new(),
        diagnostics: Vec::new(),
    };
    let mut outputs = Vec::new();
    let mut last_span = Span::dummy();

    for stmt in &program.statements {
        last_span = stmt.span;
        match &stmt.node {
            Statement::Arg { name, dims } => {
                if b.already_bound(name) {
                    continue;
                }
                match b.graph.argument(&name.node, Shape::new(dims.clone())) {
                    Ok(id) => {
                        b.scope.insert(name.node.clone(), id);
                    }
                    Err(e) => b.engine_error(e, name.span),
                }
            }
            Statement::Let { name, value } => {
                if b.already_bound(name) {
                    continue;
                }
                if let Some(id) = b.expr(value) {
                    b.scope.insert(name.node.clone(), id);
                }
            }
            Statement::Out(value) => {
                if let Some(id) = b.expr(value) {
                    outputs.push(id);
                }
            }
        }
    }

    if outputs.is_empty() && b.diagnostics.is_empty() {
        b.diagnostics.push(
            Diagnostic::error("program has no outputs", last_span)
                .with_help("mark a result with `out EXPR`"),
        );
    }
    if !b.diagnostics.is_empty() {
        return Err(b.diagnostics);
    }
    debug!(nodes = b.graph.len(), outputs = outputs.len(), "built graph from source");
    Ok(Built {
        graph: b.graph,
        outputs,
    })
}

impl Builder {
    fn already_bound(&mut self, name: &Spanned<String>) -> bool {
        if !self.scope.contains_key(&name.node) {
            return false;
        }
        self.diagnostics.push(
            Diagnostic::error(format!("'{}' is already bound", name.node), name.span)
                .with_help("names are immutable; pick a new name"),
        );
        true
    }

    fn engine_error(&mut self, e: EngineError, span: Span) {
        self.diagnostics.push(Diagnostic::error(e.to_string(), span));
    }

    fn check(&mut self, result: crate::error::Result<NodeId>, span: Span) -> Option<NodeId> {
        match result {
            Ok(id) => Some(id),
            Err(e) => {
                self.engine_error(e, span);
                None
            }
        }
    }

    fn expr(&mut self, expr: &Spanned<Expr>) -> Option<NodeId> {
        match &expr.node {
            Expr::Number(n) => Some(self.graph.scalar(*n)),
            Expr::Name(name) => match self.scope.get(name) {
                Some(&id) => Some(id),
                None => {
                    self.diagnostics.push(
                        Diagnostic::error(format!("unknown name '{}'", name), expr.span)
                            .with_help(format!("declare it with `arg {}` or `let {} = ...`", name, name)),
                    );
                    None
                }
            },
            Expr::Pack(items) => {
                let ids = self.exprs(items)?;
                let r = self.graph.pack(&ids);
                self.check(r, expr.span)
            }
            Expr::Index { target, index } => {
                let t = self.expr(target);
                match &index.node {
                    Expr::Number(k) if *k >= 0.0 && k.fract() == 0.0 => {
                        let r = self.graph.extract(t?, *k as usize);
                        self.check(r, expr.span)
                    }
                    _ => {
                        let i = self.expr(index);
                        let r = self.graph.gather(t?, i?);
                        self.check(r, expr.span)
                    }
                }
            }
            Expr::Neg(inner) => {
                let x = self.expr(inner)?;
                let r = self.graph.unary(UnaryOp::Neg, x);
                self.check(r, expr.span)
            }
            Expr::Binary { op, lhs, rhs } => {
                let a = self.expr(lhs);
                let b = self.expr(rhs);
                let (a, b) = (a?, b?);
                let r = match op {
                    BinOp::Add => self.graph.add(a, b),
                    BinOp::Sub => self.graph.sub(a, b),
                    BinOp::Mul => self.graph.mul(a, b),
                    BinOp::Div => self.graph.div(a, b),
                    BinOp::Lt => self.graph.compare(CompareOp::Lt, a, b),
                    BinOp::Le => self.graph.compare(CompareOp::Le, a, b),
                    BinOp::Gt => self.graph.compare(CompareOp::Gt, a, b),
                    BinOp::Ge => self.graph.compare(CompareOp::Ge, a, b),
                    BinOp::Eq => self.graph.compare(CompareOp::Eq, a, b),
                    BinOp::Ne => self.graph.compare(CompareOp::Ne, a, b),
                };
                self.check(r, expr.span)
            }
            Expr::Call { name, args } => self.call(name, args, expr.span),
        }
    }

    /// Build every item, reporting all failures before giving up.
    fn exprs(&mut self, items: &[Spanned<Expr>]) -> Option<Vec<NodeId>> {
        let ids: Vec<Option<NodeId>> = items.iter().map(|e| self.expr(e)).collect();
        ids.into_iter().collect()
    }

    fn call(&mut self, name: &Spanned<String>, args: &[Spanned<Expr>], span: Span) -> Option<NodeId> {
        let Some((callee, arity)) = callee(&name.node) else {
            self.diagnostics.push(
                Diagnostic::error(format!("unknown function '{}'", name.node), name.span)
                    .with_note(format!("available: {}", FUNCTIONS.join(", "))),
            );
            return None;
        };
        if args.len() != arity {
            self.diagnostics.push(Diagnostic::error(
                format!(
                    "'{}' takes {} argument(s), got {}",
                    name.node,
                    arity,
                    args.len()
                ),
                span,
            ));
            return None;
        }
        let ids = self.exprs(args)?;
        let r = match callee {
            Callee::Unary(op) => self.graph.unary(op, ids[0]),
            Callee::Binary(op) => self.graph.binary(op, ids[0], ids[1]),
            Callee::Reduce(op) => self.graph.reduce(op, ids[0]),
            Callee::Select => self.graph.select(ids[0], ids[1], ids[2]),
            Callee::Guard => self.graph.guard(ids[0], ids[1]),
        };
        self.check(r, span)
    }
}
