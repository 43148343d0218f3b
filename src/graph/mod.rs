//! Computation graph: an append-only DAG of operation nodes.
//!
//! A node may only reference nodes created before it, so every graph is
//! acyclic and construction order is a topological order. Nodes never
//! change after construction; optimizer passes build new graphs.
//!
//! Each node carries a structural hash (operation, literal, shape, and the
//! hashes of its inputs). Two nodes with the same hash compute the same
//! thing, in this graph or in any other.

pub mod eval;
pub mod hash;
pub mod shape;
mod value;

#[cfg(test)]
mod tests;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
pub use hash::StructuralHash;
pub use value::{format_float, Shape, Value};

// ─── Operation kinds ───────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Abs,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Floor,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Min,
    Max,
    Pow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceOp {
    Sum,
    Product,
    Max,
    Min,
}

impl UnaryOp {
    pub fn name(self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Abs => "abs",
            UnaryOp::Sqrt => "sqrt",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Floor => "floor",
        }
    }
}

impl BinaryOp {
    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Min => "min",
            BinaryOp::Max => "max",
            BinaryOp::Pow => "pow",
        }
    }

    /// Infix symbol, for operators every dialect writes infix.
    pub fn infix(self) -> Option<&'static str> {
        match self {
            BinaryOp::Add => Some("+"),
            BinaryOp::Sub => Some("-"),
            BinaryOp::Mul => Some("*"),
            BinaryOp::Div => Some("/"),
            _ => None,
        }
    }
}

impl CompareOp {
    pub fn name(self) -> &'static str {
        match self {
            CompareOp::Lt => "lt",
            CompareOp::Le => "le",
            CompareOp::Gt => "gt",
            CompareOp::Ge => "ge",
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }
}

impl ReduceOp {
    pub fn name(self) -> &'static str {
        match self {
            ReduceOp::Sum => "sum",
            ReduceOp::Product => "product",
            ReduceOp::Max => "max",
            ReduceOp::Min => "min",
        }
    }
}

/// The closed set of operations a node can perform.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    /// Literal value (stored on the node).
    Constant,
    /// Free input, bound by name at invocation.
    Argument(String),
    Unary(UnaryOp),
    /// Elementwise; a scalar operand broadcasts.
    Binary(BinaryOp),
    /// Elementwise comparison yielding 1.0 or 0.0.
    Compare(CompareOp),
    /// Static component of a rank-1 value.
    Extract(usize),
    /// Dynamic component `[vector, index]`; out of range leaves the lane undefined.
    Gather,
    /// Scalars into a rank-1 vector.
    Pack,
    /// `[cond, then, else]`; only the taken branch is evaluated.
    Select,
    /// `[cond, value]`; the lane is undefined unless `cond != 0`.
    Guard,
    /// All elements to one scalar.
    Reduce(ReduceOp),
}

impl OpKind {
    pub fn is_source(&self) -> bool {
        matches!(self, OpKind::Constant | OpKind::Argument(_))
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::Constant => write!(f, "constant"),
            OpKind::Argument(name) => write!(f, "argument {}", name),
            OpKind::Unary(op) => write!(f, "{}", op.name()),
            OpKind::Binary(op) => write!(f, "{}", op.name()),
            OpKind::Compare(op) => write!(f, "{}", op.name()),
            OpKind::Extract(i) => write!(f, "extract {}", i),
            OpKind::Gather => write!(f, "gather"),
            OpKind::Pack => write!(f, "pack"),
            OpKind::Select => write!(f, "select"),
            OpKind::Guard => write!(f, "guard"),
            OpKind::Reduce(op) => write!(f, "reduce {}", op.name()),
        }
    }
}

// ─── Nodes ─────────────────────────────────────────────────────────

/// Index of a node in its graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub struct Node {
    op: OpKind,
    inputs: Vec<NodeId>,
    shape: Shape,
    literal: Option<Value>,
    hash: StructuralHash,
}

impl Node {
    pub fn op(&self) -> &OpKind {
        &self.op
    }

    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn literal(&self) -> Option<&Value> {
        self.literal.as_ref()
    }

    pub fn hash(&self) -> StructuralHash {
        self.hash
    }
}

// ─── Graph ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes
            .get(id.index())
            .ok_or_else(|| EngineError::shape(format!("unknown node {}", id)))
    }

    pub fn shape_of(&self, id: NodeId) -> Result<&Shape> {
        Ok(&self.node(id)?.shape)
    }

    pub fn structural_hash(&self, id: NodeId) -> Result<StructuralHash> {
        Ok(self.node(id)?.hash)
    }

    /// Node ids in construction (topological) order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// Argument nodes in order of first declaration.
    pub fn arguments(&self) -> impl Iterator<Item = (NodeId, &str, &Shape)> + '_ {
        self.ids().filter_map(move |id| {
            let node = &self.nodes[id.index()];
            match &node.op {
                OpKind::Argument(name) => Some((id, name.as_str(), &node.shape)),
                _ => None,
            }
        })
    }

    pub fn constant(&mut self, value: Value) -> NodeId {
        let shape = value.shape().clone();
        let hash = StructuralHash::of(&OpKind::Constant, &shape, Some(&value), &[]);
        self.push(Node {
            op: OpKind::Constant,
            inputs: Vec::new(),
            shape,
            literal: Some(value),
            hash,
        })
    }

    pub fn scalar(&mut self, x: f64) -> NodeId {
        self.constant(Value::scalar(x))
    }

    /// Declare a free input. Declaring the same name again returns the
    /// existing node; a different shape is a shape error.
    pub fn argument(&mut self, name: &str, shape: Shape) -> Result<NodeId> {
        if let Some((id, _, existing)) = self.arguments().find(|(_, n, _)| *n == name) {
            if *existing != shape {
                return Err(EngineError::shape(format!(
                    "argument '{}' redeclared as {} (was {})",
                    name, shape, existing
                )));
            }
            return Ok(id);
        }
        let op = OpKind::Argument(name.to_string());
        let hash = StructuralHash::of(&op, &shape, None, &[]);
        Ok(self.push(Node {
            op,
            inputs: Vec::new(),
            shape,
            literal: None,
            hash,
        }))
    }

    /// Apply a non-source operation to existing nodes.
    pub fn apply(&mut self, op: OpKind, inputs: &[NodeId]) -> Result<NodeId> {
        if op.is_source() {
            return Err(EngineError::shape(format!(
                "'{}' cannot be applied; use constant() or argument()",
                op
            )));
        }
        let mut shapes = Vec::with_capacity(inputs.len());
        let mut hashes = Vec::with_capacity(inputs.len());
        for &input in inputs {
            let node = self.node(input)?;
            shapes.push(&node.shape);
            hashes.push(node.hash);
        }
        let shape = shape::infer(&op, &shapes)?;
        let hash = StructuralHash::of(&op, &shape, None, &hashes);
        Ok(self.push(Node {
            op,
            inputs: inputs.to_vec(),
            shape,
            literal: None,
            hash,
        }))
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    // ── Builders ──

    pub fn unary(&mut self, op: UnaryOp, x: NodeId) -> Result<NodeId> {
        self.apply(OpKind::Unary(op), &[x])
    }

    pub fn binary(&mut self, op: BinaryOp, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.apply(OpKind::Binary(op), &[a, b])
    }

    pub fn add(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.binary(BinaryOp::Add, a, b)
    }

    pub fn sub(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.binary(BinaryOp::Sub, a, b)
    }

    pub fn mul(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.binary(BinaryOp::Mul, a, b)
    }

    pub fn div(&mut self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.binary(BinaryOp::Div, a, b)
    }

    pub fn compare(&mut self, op: CompareOp, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.apply(OpKind::Compare(op), &[a, b])
    }

    pub fn extract(&mut self, x: NodeId, index: usize) -> Result<NodeId> {
        self.apply(OpKind::Extract(index), &[x])
    }

    pub fn gather(&mut self, x: NodeId, index: NodeId) -> Result<NodeId> {
        self.apply(OpKind::Gather, &[x, index])
    }

    pub fn pack(&mut self, items: &[NodeId]) -> Result<NodeId> {
        self.apply(OpKind::Pack, items)
    }

    pub fn select(&mut self, cond: NodeId, then: NodeId, otherwise: NodeId) -> Result<NodeId> {
        self.apply(OpKind::Select, &[cond, then, otherwise])
    }

    pub fn guard(&mut self, cond: NodeId, value: NodeId) -> Result<NodeId> {
        self.apply(OpKind::Guard, &[cond, value])
    }

    pub fn reduce(&mut self, op: ReduceOp, x: NodeId) -> Result<NodeId> {
        self.apply(OpKind::Reduce(op), &[x])
    }
}

/// True when two nodes (possibly in different graphs) compute the same thing.
pub fn structurally_equal(a: &Graph, a_id: NodeId, b: &Graph, b_id: NodeId) -> bool {
    match (a.node(a_id), b.node(b_id)) {
        (Ok(x), Ok(y)) => x.hash == y.hash,
        _ => false,
    }
}
