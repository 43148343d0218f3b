//! The one-way lifecycle of a computation as typestate.
//!
//! `Defined → Optimized → Lowered → Delivered → (invoke)* → dispose`.
//! Each step consumes the previous state, so a stage cannot be revisited.

use std::sync::Arc;

use tracing::debug;

use crate::backend::{Backend, DeliveryCache, Executable};
use crate::config::Precision;
use crate::diagnostic::Diagnostic;
use crate::error::{EngineError, Result};
use crate::graph::{Graph, NodeId, StructuralHash, Value};
use crate::ir::{lower, validate, NamingAuthority, Scope};
use crate::kernel::{Kernel, Sentinel};
use crate::opt::{compact_scope, OptLevel, PassManager};
use crate::syntax;

/// A graph with designated outputs.
#[derive(Clone, Debug)]
pub struct Defined {
    graph: Graph,
    outputs: Vec<NodeId>,
}

impl Defined {
    pub fn new(graph: Graph, outputs: Vec<NodeId>) -> Result<Self> {
        if outputs.is_empty() {
            return Err(EngineError::compile("a computation needs at least one output"));
        }
        for &id in &outputs {
            graph.node(id)?;
        }
        Ok(Self { graph, outputs })
    }

    /// Parse and build a graph from expression source.
    pub fn from_source(source: &str) -> std::result::Result<Self, Vec<Diagnostic>> {
        let program = syntax::parse_source(source)?;
        let built = syntax::build_graph(&program)?;
        Ok(Self {
            graph: built.graph,
            outputs: built.outputs,
        })
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    /// Run the graph passes of `level` for a target computing at
    /// `precision`.
    pub fn optimize(self, level: OptLevel, precision: Precision) -> Result<Optimized> {
        let before = self.graph.len();
        let passes = PassManager::for_level(level, precision);
        let (graph, outputs) = passes.run(&self.graph, &self.outputs)?;
        debug!(
            ?level,
            %precision,
            passes = ?passes.pass_names(),
            before,
            after = graph.len(),
            "optimized graph"
        );
        Ok(Optimized {
            graph,
            outputs,
            level,
        })
    }
}

#[derive(Clone, Debug)]
pub struct Optimized {
    graph: Graph,
    outputs: Vec<NodeId>,
    level: OptLevel,
}

impl Optimized {
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    /// Structural hashes of the outputs, in order.
    pub fn output_hashes(&self) -> Result<Vec<StructuralHash>> {
        self.outputs
            .iter()
            .map(|&id| self.graph.structural_hash(id))
            .collect()
    }

    /// Lower to a scope, then run the scope passes of the same level.
    pub fn lower(self, names: &mut NamingAuthority) -> Result<Lowered> {
        let scope = lower(&self.graph, &self.outputs, names)?;
        let scope = compact_scope(&scope, self.level);
        validate(&scope)?;
        debug!(
            scope = %scope.name,
            declarations = scope.declaration_count(),
            "lowered scope"
        );
        Ok(Lowered { scope })
    }
}

#[derive(Clone, Debug)]
pub struct Lowered {
    scope: Scope,
}

impl Lowered {
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn deliver(self, backend: &dyn Backend) -> Result<Delivered> {
        let executable = Arc::new(backend.deliver(&self.scope)?);
        Ok(Delivered {
            scope: self.scope,
            executable,
        })
    }

    /// Deliver through a cache shared with other computations.
    pub fn deliver_cached(self, backend: &dyn Backend, cache: &DeliveryCache) -> Result<Delivered> {
        let executable = cache.deliver(backend, &self.scope)?;
        Ok(Delivered {
            scope: self.scope,
            executable,
        })
    }
}

#[derive(Debug)]
pub struct Delivered {
    scope: Scope,
    executable: Arc<Executable>,
}

impl Delivered {
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn executable(&self) -> &Arc<Executable> {
        &self.executable
    }

    pub fn source(&self) -> Option<&str> {
        self.executable.source()
    }

    pub fn invoke(&self, arguments: &[Value]) -> Result<Vec<Value>> {
        self.executable.invoke(arguments)
    }

    pub fn kernel(&self, sentinel: Sentinel) -> Kernel {
        Kernel::new(Arc::clone(&self.executable), sentinel)
    }

    /// Release the executable. Kernels still holding it fail with a usage
    /// error from here on.
    pub fn dispose(self) {
        self.executable.dispose();
    }
}
