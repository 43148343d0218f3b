//! Constant folding.
//!
//! A node whose inputs are all literals collapses to a literal computed by
//! the reference evaluator. A node whose evaluation would leave the lane
//! undefined (failed guard, out-of-range gather) is kept, so the failure
//! still happens at run time. A select or guard with a literal condition
//! is replaced by the input it would yield.
//!
//! Folding happens at the target's precision, so a folded literal equals
//! what the target itself would have computed.

use super::{copy_node, rebuild, GraphPass};
use crate::config::Precision;
use crate::error::Result;
use crate::graph::{eval, Graph, NodeId, OpKind, Value};

#[derive(Debug)]
pub struct ConstantFolding {
    precision: Precision,
}

impl ConstantFolding {
    pub fn new(precision: Precision) -> Self {
        Self { precision }
    }
}

impl GraphPass for ConstantFolding {
    fn name(&self) -> &str {
        "const-fold"
    }

    fn run(&self, graph: &Graph, roots: &[NodeId]) -> Result<(Graph, Vec<NodeId>)> {
        rebuild(graph, roots, |out, node, inputs| {
            if node.op().is_source() {
                return copy_node(out, node, inputs);
            }
            let literals: Vec<Option<Value>> = inputs
                .iter()
                .map(|&i| out.node(i).map(|n| n.literal().cloned()))
                .collect::<Result<_>>()?;

            match (node.op(), literals.first()) {
                (OpKind::Select, Some(Some(cond))) => {
                    let taken = if eval::is_true(cond.element(0)) { 1 } else { 2 };
                    return Ok(inputs[taken]);
                }
                (OpKind::Guard, Some(Some(cond))) if eval::is_true(cond.element(0)) => {
                    return Ok(inputs[1]);
                }
                _ => {}
            }

            if literals.iter().all(Option::is_some) {
                let values: Vec<&Value> = literals.iter().flatten().collect();
                if let Ok(folded) = eval::apply_at(node.op(), &values, self.precision) {
                    return Ok(out.constant(folded));
                }
            }
            copy_node(out, node, inputs)
        })
    }
}
