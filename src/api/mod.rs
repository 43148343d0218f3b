//! Evaluation façade over the whole pipeline.
//!
//! [`Engine`] resolves targets by name, runs optimize → lower → deliver
//! with the engine's options and memoizes delivered executables. The
//! lifecycle types in [`pipeline`] are available for callers that want
//! to drive each stage themselves.

pub mod pipeline;


use std::sync::Arc;

use crate::backend::{Backend, BackendRegistry, DeliveryCache, Executable};
use crate::diagnostic::{render_diagnostics, Diagnostic};
use crate::error::Result;
use crate::graph::{Graph, NodeId, Value};
use crate::ir::NamingAuthority;
use crate::kernel::{Kernel, Sentinel};
use crate::opt::OptLevel;

pub use pipeline::{Defined, Delivered, Lowered, Optimized};

/// Per-computation settings. Not part of any backend policy.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct EngineOptions {
    pub opt_level: OptLevel,
    pub sentinel: Sentinel,
}

impl EngineOptions {
    pub fn with_opt_level(mut self, level: OptLevel) -> Self {
        self.opt_level = level;
        self
    }

    pub fn with_sentinel(mut self, sentinel: Sentinel) -> Self {
        self.sentinel = sentinel;
        self
    }
}

pub struct Engine {
    registry: BackendRegistry,
    cache: DeliveryCache,
    options: EngineOptions,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// An engine over every built-in backend.
    pub fn new() -> Self {
        Self::with_registry(BackendRegistry::with_defaults(), EngineOptions::default())
    }

    pub fn with_options(options: EngineOptions) -> Self {
        Self::with_registry(BackendRegistry::with_defaults(), options)
    }

    pub fn with_registry(registry: BackendRegistry, options: EngineOptions) -> Self {
        Self {
            registry,
            cache: DeliveryCache::new(),
            options,
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        self.registry.register(backend);
    }

    pub fn backend(&self, target: &str) -> Result<Arc<dyn Backend>> {
        self.registry.get(target)
    }

    /// Optimize at the target's precision and lower with its identifier
    /// prefix.
    pub fn lower(&self, target: &str, graph: &Graph, outputs: &[NodeId]) -> Result<Lowered> {
        let backend = self.backend(target)?;
        let policy = backend.policy();
        let mut names = NamingAuthority::new(&policy.identifier_prefix);
        Defined::new(graph.clone(), outputs.to_vec())?
            .optimize(self.options.opt_level, policy.precision)?
            .lower(&mut names)
    }

    pub fn deliver(&self, target: &str, graph: &Graph, outputs: &[NodeId]) -> Result<Arc<Executable>> {
        let backend = self.backend(target)?;
        let lowered = self.lower(target, graph, outputs)?;
        Ok(Arc::clone(
            lowered.deliver_cached(backend.as_ref(), &self.cache)?.executable(),
        ))
    }

    /// Text for a target: kernel source, or the scope listing for
    /// backends that run without source.
    pub fn emit(&self, target: &str, graph: &Graph, outputs: &[NodeId]) -> Result<String> {
        let backend = self.backend(target)?;
        let lowered = self.lower(target, graph, outputs)?;
        let listing = lowered.scope().to_string();
        let delivered = lowered.deliver_cached(backend.as_ref(), &self.cache)?;
        Ok(delivered.source().map_or(listing, str::to_string))
    }

    /// Single invocation.
    pub fn evaluate(
        &self,
        target: &str,
        graph: &Graph,
        outputs: &[NodeId],
        arguments: &[Value],
    ) -> Result<Vec<Value>> {
        self.deliver(target, graph, outputs)?.invoke(arguments)
    }

    /// A batch kernel using the engine's sentinel.
    pub fn kernel(&self, target: &str, graph: &Graph, outputs: &[NodeId]) -> Result<Kernel> {
        let executable = self.deliver(target, graph, outputs)?;
        Ok(Kernel::new(executable, self.options.sentinel))
    }

    /// (hits, misses) of the delivery cache.
    pub fn cache_stats(&self) -> (usize, usize) {
        self.cache.stats()
    }

    /// Dispose every cached executable.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

/// Parse expression source into a graph, rendering any diagnostics to
/// stderr against `filename`.
pub fn load_source(source: &str, filename: &str) -> std::result::Result<Defined, Vec<Diagnostic>> {
    Defined::from_source(source).map_err(|errors| {
        render_diagnostics(&errors, filename, source);
        errors
    })
}
