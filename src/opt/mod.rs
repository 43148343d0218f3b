//! Optimizer: compaction passes over graphs and lowered scopes.
//!
//! Graph passes implement [`GraphPass`] and run inside a [`PassManager`]
//! with fixed-point iteration. Each graph pass rebuilds the graph from
//! scratch, keeping every argument (so external positions never move) and
//! the cone of the designated roots. Scope passes run after lowering via
//! [`compact_scope`]. No pass changes observable results, and running the
//! whole pipeline twice yields the same graph as running it once.

mod const_fold;
mod cse;
mod dce;
mod inline;

#[cfg(test)]
mod tests;

pub use const_fold::ConstantFolding;
pub use cse::CommonSubexpressions;
pub use dce::eliminate_dead_bindings;
pub use inline::inline_single_use;

use std::fmt::Debug;

use tracing::debug;

use crate::config::Precision;
use crate::error::{EngineError, Result};
use crate::graph::{Graph, Node, NodeId, OpKind, StructuralHash};
use crate::ir::Scope;

/// An optimization pass that rebuilds a graph.
pub trait GraphPass: Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Produce the rewritten graph and the new ids of `roots`.
    fn run(&self, graph: &Graph, roots: &[NodeId]) -> Result<(Graph, Vec<NodeId>)>;
}

/// Optimization level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptLevel {
    /// No optimizations.
    O0,
    /// Deduplication, constant folding, dead-binding elimination.
    #[default]
    O1,
    /// O1 plus single-use inlining.
    O2,
}

impl OptLevel {
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            0 => Some(OptLevel::O0),
            1 => Some(OptLevel::O1),
            2 => Some(OptLevel::O2),
            _ => None,
        }
    }
}

/// Maximum number of fixed-point iterations before giving up.
const MAX_ITERATIONS: usize = 16;

/// Runs graph passes in sequence with fixed-point iteration.
#[derive(Debug, Default)]
pub struct PassManager {
    passes: Vec<Box<dyn GraphPass>>,
}

impl PassManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Graph passes of `level`, folding constants at `precision`.
    pub fn for_level(level: OptLevel, precision: Precision) -> Self {
        let mut pm = Self::new();
        if level >= OptLevel::O1 {
            pm.add_pass(Box::new(CommonSubexpressions));
            pm.add_pass(Box::new(ConstantFolding::new(precision)));
        }
        pm
    }

    pub fn add_pass(&mut self, pass: Box<dyn GraphPass>) {
        self.passes.push(pass);
    }

    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run all passes until nothing changes or the iteration limit is hit.
    pub fn run(&self, graph: &Graph, roots: &[NodeId]) -> Result<(Graph, Vec<NodeId>)> {
        let mut current = (graph.clone(), roots.to_vec());
        if self.passes.is_empty() {
            return Ok(current);
        }
        for round in 0..MAX_ITERATIONS {
            let before = fingerprint(&current.0, &current.1)?;
            for pass in &self.passes {
                current = pass.run(&current.0, &current.1)?;
            }
            if fingerprint(&current.0, &current.1)? == before {
                debug!(rounds = round + 1, nodes = current.0.len(), "graph passes converged");
                break;
            }
        }
        Ok(current)
    }
}

/// Run the O1 graph passes for a target computing at `precision`.
pub fn optimize(graph: &Graph, roots: &[NodeId], precision: Precision) -> Result<(Graph, Vec<NodeId>)> {
    PassManager::for_level(OptLevel::O1, precision).run(graph, roots)
}

/// Run the scope passes selected by `level`.
pub fn compact_scope(scope: &Scope, level: OptLevel) -> Scope {
    match level {
        OptLevel::O0 => scope.clone(),
        OptLevel::O1 => eliminate_dead_bindings(scope),
        OptLevel::O2 => eliminate_dead_bindings(&inline_single_use(&eliminate_dead_bindings(scope))),
    }
}

fn fingerprint(graph: &Graph, roots: &[NodeId]) -> Result<(Vec<StructuralHash>, Vec<StructuralHash>)> {
    let nodes = graph
        .ids()
        .map(|id| graph.structural_hash(id))
        .collect::<Result<_>>()?;
    let roots = roots
        .iter()
        .map(|&id| graph.structural_hash(id))
        .collect::<Result<_>>()?;
    Ok((nodes, roots))
}

/// Nodes to keep: every argument plus the cone of `roots`.
fn live_set(graph: &Graph, roots: &[NodeId]) -> Result<Vec<bool>> {
    let mut live = vec![false; graph.len()];
    for &root in roots {
        graph.node(root)?;
        live[root.index()] = true;
    }
    for id in graph.ids().collect::<Vec<_>>().into_iter().rev() {
        let node = graph.node(id)?;
        if matches!(node.op(), OpKind::Argument(_)) {
            live[id.index()] = true;
        }
        if live[id.index()] {
            for input in node.inputs() {
                live[input.index()] = true;
            }
        }
    }
    Ok(live)
}

/// Rebuild the live part of `graph` in construction order; `visit`
/// decides the new id of each node given its already-rebuilt inputs.
fn rebuild(
    graph: &Graph,
    roots: &[NodeId],
    mut visit: impl FnMut(&mut Graph, &Node, &[NodeId]) -> Result<NodeId>,
) -> Result<(Graph, Vec<NodeId>)> {
    let live = live_set(graph, roots)?;
    let mut out = Graph::new();
    let mut map: Vec<Option<NodeId>> = vec![None; graph.len()];
    for id in graph.ids() {
        if !live[id.index()] {
            continue;
        }
        let node = graph.node(id)?;
        let inputs = node
            .inputs()
            .iter()
            .map(|i| remapped(&map, *i))
            .collect::<Result<Vec<_>>>()?;
        map[id.index()] = Some(visit(&mut out, node, &inputs)?);
    }
    let roots = roots
        .iter()
        .map(|r| remapped(&map, *r))
        .collect::<Result<_>>()?;
    Ok((out, roots))
}

fn remapped(map: &[Option<NodeId>], id: NodeId) -> Result<NodeId> {
    map.get(id.index())
        .copied()
        .flatten()
        .ok_or_else(|| EngineError::compile(format!("{} was dropped while still in use", id)))
}

/// Copy one node unchanged onto rebuilt inputs.
fn copy_node(out: &mut Graph, node: &Node, inputs: &[NodeId]) -> Result<NodeId> {
    match node.op() {
        OpKind::Constant => match node.literal() {
            Some(v) => Ok(out.constant(v.clone())),
            None => Err(EngineError::compile("constant without a literal")),
        },
        OpKind::Argument(name) => out.argument(name, node.shape().clone()),
        op => out.apply(op.clone(), inputs),
    }
}
