//! Lowering: consumes a `Graph` and produces a `Scope`.
//!
//! Nodes are visited in construction order, which is a topological order
//! of the append-only arena, so output is deterministic and diff-stable.
//! A `Select` only forces its condition; each branch is lowered lazily
//! into its own sub-scope. A `Reduce` gets a body sub-scope that reads one
//! element of the captured operand per counter value.

#[cfg(test)]
mod tests;

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use super::{ArgumentBinding, ArgumentSource, Declaration, Expr, NamingAuthority, Scope};
use crate::error::{EngineError, Result};
use crate::graph::{Graph, NodeId, OpKind, Shape};

/// Lower the cone of `outputs` into a root scope.
///
/// Every argument of the graph becomes an `External` binding, in order of
/// first declaration, whether or not the outputs read it.
pub fn lower(graph: &Graph, outputs: &[NodeId], names: &mut NamingAuthority) -> Result<Scope> {
    if outputs.is_empty() {
        return Err(EngineError::compile("a computation needs at least one output"));
    }
    for &id in outputs {
        graph.node(id)?;
    }

    let mut scope = Scope::new(names.fresh_hinted("kernel"));
    let mut frame = Frame::default();
    for (position, (id, label, shape)) in graph.arguments().enumerate() {
        let name = names.claim(label);
        scope.arguments.push(ArgumentBinding {
            name: name.clone(),
            shape: shape.clone(),
            source: ArgumentSource::External {
                position,
                label: label.to_string(),
            },
        });
        frame.local.insert(id, name);
    }

    let mut lowerer = Lowerer { graph, names };
    lowerer.fill(&mut scope, &mut frame, outputs)?;
    scope.outputs = outputs
        .iter()
        .map(|&id| lowerer.reference(&mut frame, id))
        .collect::<Result<_>>()?;

    debug!(
        scope = %scope.name,
        nodes = graph.len(),
        declarations = scope.declaration_count(),
        names = lowerer.names.issued(),
        "lowered graph"
    );
    Ok(scope)
}

/// Names visible while lowering one scope.
#[derive(Default)]
struct Frame {
    /// Names bound by ancestor scopes.
    outer: HashMap<NodeId, String>,
    /// Names bound by this scope (arguments and declarations so far).
    local: HashMap<NodeId, String>,
    /// Ancestor names this scope reads, in first-read order.
    captures: Vec<NodeId>,
}

impl Frame {
    fn child(&self) -> Frame {
        let mut outer = self.outer.clone();
        outer.extend(self.local.iter().map(|(k, v)| (*k, v.clone())));
        Frame {
            outer,
            local: HashMap::new(),
            captures: Vec::new(),
        }
    }

    fn is_bound(&self, id: NodeId) -> bool {
        self.local.contains_key(&id) || self.outer.contains_key(&id)
    }
}

struct Lowerer<'g, 'n> {
    graph: &'g Graph,
    names: &'n mut NamingAuthority,
}

impl Lowerer<'_, '_> {
    /// Declare, in ascending node order, every unbound node `roots` force.
    fn fill(&mut self, scope: &mut Scope, frame: &mut Frame, roots: &[NodeId]) -> Result<()> {
        for id in self.eager_set(frame, roots)? {
            let decl = self.declare(frame, id)?;
            frame.local.insert(id, decl.name().to_string());
            scope.declarations.push(decl);
        }
        Ok(())
    }

    /// Nodes that must be evaluated for `roots`, stopping at bound names
    /// and at the branches of a select.
    fn eager_set(&self, frame: &Frame, roots: &[NodeId]) -> Result<BTreeSet<NodeId>> {
        let mut set = BTreeSet::new();
        let mut stack: Vec<NodeId> = roots.to_vec();
        while let Some(id) = stack.pop() {
            if frame.is_bound(id) || !set.insert(id) {
                continue;
            }
            let node = self.graph.node(id)?;
            match node.op() {
                OpKind::Select => stack.push(node.inputs()[0]),
                OpKind::Argument(name) => {
                    return Err(EngineError::compile(format!(
                        "argument '{}' ({}) is not bound",
                        name, id
                    )))
                }
                _ => stack.extend_from_slice(node.inputs()),
            }
        }
        Ok(set)
    }

    fn declare(&mut self, frame: &mut Frame, id: NodeId) -> Result<Declaration> {
        let graph = self.graph;
        let node = graph.node(id)?;
        let shape = node.shape().clone();
        let inputs = node.inputs().to_vec();

        let expr = match node.op() {
            OpKind::Constant => {
                let value = node
                    .literal()
                    .ok_or_else(|| EngineError::compile(format!("constant {} has no literal", id)))?;
                Expr::Literal(value.clone())
            }
            OpKind::Argument(name) => {
                return Err(EngineError::compile(format!("argument '{}' is not bound", name)))
            }
            OpKind::Unary(op) => Expr::Unary(*op, Box::new(self.operand(frame, inputs[0])?)),
            OpKind::Binary(op) => Expr::Binary(
                *op,
                Box::new(self.operand(frame, inputs[0])?),
                Box::new(self.operand(frame, inputs[1])?),
            ),
            OpKind::Compare(op) => Expr::Compare(
                *op,
                Box::new(self.operand(frame, inputs[0])?),
                Box::new(self.operand(frame, inputs[1])?),
            ),
            OpKind::Extract(k) => Expr::Extract(Box::new(self.operand(frame, inputs[0])?), *k),
            OpKind::Gather => Expr::Gather(
                Box::new(self.operand(frame, inputs[0])?),
                Box::new(self.operand(frame, inputs[1])?),
            ),
            OpKind::Pack => Expr::Pack(
                inputs
                    .iter()
                    .map(|&i| self.operand(frame, i))
                    .collect::<Result<_>>()?,
            ),
            OpKind::Guard => {
                let cond = self.operand(frame, inputs[0])?;
                let value = self.operand(frame, inputs[1])?;
                return Ok(Declaration::Guard {
                    name: self.names.fresh(),
                    shape,
                    cond,
                    value,
                });
            }
            OpKind::Select => {
                let cond = self.operand(frame, inputs[0])?;
                let name = self.names.fresh();
                let then_scope = self.branch_scope(frame, &format!("{}_then", name), inputs[1])?;
                let else_scope = self.branch_scope(frame, &format!("{}_else", name), inputs[2])?;
                return Ok(Declaration::Branch {
                    name,
                    shape,
                    cond,
                    then_scope,
                    else_scope,
                });
            }
            OpKind::Reduce(op) => {
                let operand_shape = graph.shape_of(inputs[0])?.clone();
                let operand = self.reference(frame, inputs[0])?;
                let name = self.names.fresh();
                let counter = self.names.fresh_hinted("i");
                let element = self.names.fresh();

                let mut body = Scope::new(format!("{}_body", name));
                body.arguments.push(ArgumentBinding {
                    name: counter.clone(),
                    shape: Shape::scalar(),
                    source: ArgumentSource::Counter,
                });
                body.arguments.push(ArgumentBinding {
                    name: operand.clone(),
                    shape: operand_shape.clone(),
                    source: ArgumentSource::Capture,
                });
                body.declarations.push(Declaration::Let {
                    name: element.clone(),
                    shape: Shape::scalar(),
                    expr: Expr::Gather(Box::new(Expr::Ref(operand)), Box::new(Expr::Ref(counter))),
                });
                body.outputs.push(element);

                return Ok(Declaration::Reduce {
                    name,
                    op: *op,
                    extent: operand_shape.size(),
                    body,
                });
            }
        };

        Ok(Declaration::Let {
            name: self.names.fresh(),
            shape,
            expr,
        })
    }

    fn branch_scope(&mut self, frame: &mut Frame, name: &str, root: NodeId) -> Result<Scope> {
        let mut scope = Scope::new(name);
        let mut child = frame.child();
        self.fill(&mut scope, &mut child, &[root])?;
        let output = self.reference(&mut child, root)?;
        scope.outputs.push(output);

        for id in std::mem::take(&mut child.captures) {
            let name = self.reference(frame, id)?;
            scope.arguments.push(ArgumentBinding {
                name,
                shape: self.graph.shape_of(id)?.clone(),
                source: ArgumentSource::Capture,
            });
        }
        Ok(scope)
    }

    fn operand(&mut self, frame: &mut Frame, id: NodeId) -> Result<Expr> {
        Ok(Expr::Ref(self.reference(frame, id)?))
    }

    /// Name of a bound node; reading an ancestor's name records a capture.
    fn reference(&mut self, frame: &mut Frame, id: NodeId) -> Result<String> {
        if let Some(name) = frame.local.get(&id) {
            return Ok(name.clone());
        }
        if let Some(name) = frame.outer.get(&id) {
            if !frame.captures.contains(&id) {
                frame.captures.push(id);
            }
            return Ok(name.clone());
        }
        Err(EngineError::compile(format!("{} is read before it is bound", id)))
    }
}
