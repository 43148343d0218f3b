//! Common-subexpression elimination via structural hashing.

use std::collections::HashMap;

use super::{copy_node, rebuild, GraphPass};
use crate::error::Result;
use crate::graph::{Graph, NodeId};

/// Maps every node to the first node with the same structural hash.
///
/// Inputs are rebuilt before their users, so the hash of a node's copy
/// equals the hash of the original and one lookup per node suffices.
#[derive(Debug)]
pub struct CommonSubexpressions;

impl GraphPass for CommonSubexpressions {
    fn name(&self) -> &str {
        "cse"
    }

    fn run(&self, graph: &Graph, roots: &[NodeId]) -> Result<(Graph, Vec<NodeId>)> {
        let mut seen = HashMap::new();
        rebuild(graph, roots, |out, node, inputs| {
            if let Some(&existing) = seen.get(&node.hash()) {
                return Ok(existing);
            }
            let id = copy_node(out, node, inputs)?;
            seen.insert(node.hash(), id);
            Ok(id)
        })
    }
}
