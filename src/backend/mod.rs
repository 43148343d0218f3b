//! Backends: turn a lowered `Scope` into an `Executable`.
//!
//! Every backend is an independent implementation of [`Backend`] over the
//! same opaque scope. Runnable backends hand back an executable holding an
//! [`InstructionSet`]; textual emitters hand back one that carries source
//! only. Backends are resolved by name through [`create_backend`], the
//! same way policies are.

pub mod interp;
pub mod tensor;


use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rayon::prelude::*;
use tracing::debug;

use crate::config::{Dialect, Policy};
use crate::error::{EngineError, Result};
use crate::graph::{Shape, Value};
use crate::ir::{ArgumentSource, Scope};

pub use interp::InterpBackend;
pub use tensor::TensorBackend;

/// A pluggable target turning scopes into executables under one policy.
pub trait Backend: Send + Sync {
    /// Registry name (e.g. "interp", "opencl").
    fn name(&self) -> &str;

    fn policy(&self) -> &Policy;

    /// Build an executable for `scope`. Fails with a compile error rather
    /// than dropping operations or degrading precision.
    fn deliver(&self, scope: &Scope) -> Result<Executable>;
}

// ─── Signature ────────────────────────────────────────────────────

/// One caller-supplied argument: its graph name and shape.
#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    pub label: String,
    pub shape: Shape,
}

/// Arguments and outputs of an executable, in position order.
#[derive(Clone, Debug, PartialEq)]
pub struct Signature {
    pub parameters: Vec<Parameter>,
    pub outputs: Vec<Shape>,
}

impl Signature {
    pub fn of(scope: &Scope) -> Result<Self> {
        let parameters = scope
            .externals()
            .into_iter()
            .map(|b| match &b.source {
                ArgumentSource::External { label, .. } => Parameter {
                    label: label.clone(),
                    shape: b.shape.clone(),
                },
                _ => Parameter {
                    label: b.name.clone(),
                    shape: b.shape.clone(),
                },
            })
            .collect();
        Ok(Self {
            parameters,
            outputs: scope.output_shapes()?,
        })
    }

    /// Check invocation values against the parameters by position and shape.
    pub fn check(&self, arguments: &[Value]) -> Result<()> {
        if arguments.len() != self.parameters.len() {
            return Err(EngineError::argument(format!(
                "expected {} argument(s), got {}",
                self.parameters.len(),
                arguments.len()
            )));
        }
        for (i, (p, v)) in self.parameters.iter().zip(arguments).enumerate() {
            if p.shape != *v.shape() {
                return Err(EngineError::argument(format!(
                    "argument {} ('{}') expects {}, got {}",
                    i,
                    p.label,
                    p.shape,
                    v.shape()
                )));
            }
        }
        Ok(())
    }

    /// Check that `batch` was laid out for these parameters: same count,
    /// same shape at every position.
    pub fn check_batch(&self, batch: &LaneBatch<'_>) -> Result<()> {
        let given = batch.parameters();
        if given.len() != self.parameters.len() {
            return Err(EngineError::argument(format!(
                "batch carries {} binding(s), executable expects {}",
                given.len(),
                self.parameters.len()
            )));
        }
        for (i, (want, got)) in self.parameters.iter().zip(given).enumerate() {
            if want.shape != got.shape {
                return Err(EngineError::argument(format!(
                    "batch binding {} ('{}') is laid out as {}, executable expects {}",
                    i, got.label, got.shape, want.shape
                )));
            }
        }
        Ok(())
    }

    /// Elements one lane writes, all outputs concatenated.
    pub fn output_len(&self) -> usize {
        self.outputs.iter().map(Shape::size).sum()
    }
}

// ─── Lane batches ─────────────────────────────────────────────────

/// Data for one argument position across a batch.
#[derive(Clone, Copy, Debug)]
pub enum LaneInput<'a> {
    /// `lanes × size` elements, one record per lane.
    Varying(&'a [f64]),
    /// The same value for every lane.
    Invariant(&'a Value),
}

/// Inputs for evaluating one executable over many lanes.
#[derive(Debug)]
pub struct LaneBatch<'a> {
    lanes: usize,
    parameters: &'a [Parameter],
    inputs: Vec<LaneInput<'a>>,
}

impl<'a> LaneBatch<'a> {
    pub fn new(signature: &'a Signature, inputs: Vec<LaneInput<'a>>, lanes: usize) -> Result<Self> {
        if inputs.len() != signature.parameters.len() {
            return Err(EngineError::argument(format!(
                "expected {} lane binding(s), got {}",
                signature.parameters.len(),
                inputs.len()
            )));
        }
        for (i, (p, input)) in signature.parameters.iter().zip(&inputs).enumerate() {
            match input {
                LaneInput::Varying(data) => {
                    if data.len() != lanes * p.shape.size() {
                        return Err(EngineError::argument(format!(
                            "binding {} ('{}') holds {} element(s), {} lanes of {} need {}",
                            i,
                            p.label,
                            data.len(),
                            lanes,
                            p.shape,
                            lanes * p.shape.size()
                        )));
                    }
                }
                LaneInput::Invariant(v) => {
                    if *v.shape() != p.shape {
                        return Err(EngineError::argument(format!(
                            "binding {} ('{}') expects {}, got {}",
                            i,
                            p.label,
                            p.shape,
                            v.shape()
                        )));
                    }
                }
            }
        }
        Ok(Self {
            lanes,
            parameters: &signature.parameters,
            inputs,
        })
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }

    pub fn inputs(&self) -> &[LaneInput<'a>] {
        &self.inputs
    }

    pub fn parameters(&self) -> &[Parameter] {
        self.parameters
    }

    /// Argument values of one lane.
    pub fn arguments(&self, lane: usize) -> Result<Vec<Value>> {
        self.parameters
            .iter()
            .zip(&self.inputs)
            .map(|(p, input)| match input {
                LaneInput::Varying(data) => {
                    let size = p.shape.size();
                    Value::new(p.shape.clone(), data[lane * size..(lane + 1) * size].to_vec())
                }
                LaneInput::Invariant(v) => Ok((*v).clone()),
            })
            .collect()
    }
}

/// Per-lane results: `lanes × record_len` elements plus a defined flag per lane.
#[derive(Clone, Debug, PartialEq)]
pub struct LaneResults {
    pub record_len: usize,
    pub data: Vec<f64>,
    pub defined: Vec<bool>,
}

impl LaneResults {
    pub fn lane(&self, lane: usize) -> &[f64] {
        &self.data[lane * self.record_len..(lane + 1) * self.record_len]
    }
}

/// A realized, invocable artifact.
pub trait InstructionSet: Send + Sync {
    /// Evaluate once. A lane-local failure is returned as `LaneUndefined`.
    fn invoke(&self, arguments: &[Value]) -> Result<Vec<Value>>;

    /// Evaluate every lane of a batch. Lane-local failures clear the
    /// lane's defined flag; any other error aborts the batch.
    fn invoke_lanes(&self, batch: &LaneBatch<'_>, record_len: usize) -> Result<LaneResults> {
        per_lane(self, batch, record_len)
    }

    /// Release backend-held resources. Called once, on dispose.
    fn release(&self) {}
}

/// Run `invoke` once per lane on the rayon pool.
pub fn per_lane<I: InstructionSet + ?Sized>(
    set: &I,
    batch: &LaneBatch<'_>,
    record_len: usize,
) -> Result<LaneResults> {
    let rows: Vec<Option<Vec<f64>>> = (0..batch.lanes())
        .into_par_iter()
        .map(|lane| {
            let arguments = batch.arguments(lane)?;
            match set.invoke(&arguments) {
                Ok(values) => Ok(Some(values.into_iter().flat_map(Value::into_data).collect())),
                Err(e) if e.is_lane_local() => Ok(None),
                Err(e) => Err(e),
            }
        })
        .collect::<Result<_>>()?;

    let mut data = Vec::with_capacity(rows.len() * record_len);
    let mut defined = Vec::with_capacity(rows.len());
    for row in rows {
        match row {
            Some(values) => {
                data.extend(values);
                defined.push(true);
            }
            None => {
                data.extend(std::iter::repeat(f64::NAN).take(record_len));
                defined.push(false);
            }
        }
    }
    Ok(LaneResults {
        record_len,
        data,
        defined,
    })
}

// ─── Executable ───────────────────────────────────────────────────

/// An artifact bound to one scope and one backend.
///
/// Lifecycle: deliver → invoke (0..n) → dispose. Disposal is one-way;
/// invoking afterwards is a usage error.
pub struct Executable {
    backend: String,
    signature: Signature,
    source: Option<String>,
    program: Option<Box<dyn InstructionSet>>,
    disposed: AtomicBool,
}

impl Executable {
    pub fn new(backend: &str, signature: Signature, program: Box<dyn InstructionSet>) -> Self {
        Self {
            backend: backend.to_string(),
            signature,
            source: None,
            program: Some(program),
            disposed: AtomicBool::new(false),
        }
    }

    /// An executable that only carries emitted source.
    pub fn source_only(backend: &str, signature: Signature, source: String) -> Self {
        Self {
            backend: backend.to_string(),
            signature,
            source: Some(source),
            program: None,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn with_source(mut self, source: String) -> Self {
        self.source = Some(source);
        self
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn is_runnable(&self) -> bool {
        self.program.is_some()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn invoke(&self, arguments: &[Value]) -> Result<Vec<Value>> {
        let program = self.program()?;
        self.signature.check(arguments)?;
        program.invoke(arguments)
    }

    /// Evaluate a batch built against this executable's signature.
    pub fn invoke_lanes(&self, batch: &LaneBatch<'_>) -> Result<LaneResults> {
        let program = self.program()?;
        self.signature.check_batch(batch)?;
        program.invoke_lanes(batch, self.signature.output_len())
    }

    /// Release backend resources. Later calls are no-ops.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            if let Some(program) = &self.program {
                program.release();
            }
            debug!(backend = %self.backend, "disposed executable");
        }
    }

    fn program(&self) -> Result<&dyn InstructionSet> {
        if self.is_disposed() {
            return Err(EngineError::usage(format!(
                "executable from '{}' invoked after dispose",
                self.backend
            )));
        }
        self.program.as_deref().ok_or_else(|| {
            EngineError::resource(format!(
                "backend '{}' produces source only; run it in its target environment",
                self.backend
            ))
        })
    }
}

impl fmt::Debug for Executable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executable")
            .field("backend", &self.backend)
            .field("signature", &self.signature)
            .field("runnable", &self.is_runnable())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ─── Delivery cache ───────────────────────────────────────────────

/// Entries a cache holds unless configured otherwise.
pub const DEFAULT_CACHE_CAPACITY: usize = 256;

struct CacheEntry {
    executable: Arc<Executable>,
    last_used: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<[u8; 32], CacheEntry>,
    tick: u64,
}

/// Memoizes executables per (backend, policy, scope).
///
/// Keys are BLAKE3 digests of the backend name, the policy fingerprint
/// and the scope's text form. A disposed entry is delivered again.
/// Disposed entries are dropped on every miss, and once `capacity`
/// entries are live the least recently used one is dropped. Dropping an
/// entry does not dispose it; holders keep a working executable.
pub struct DeliveryCache {
    state: Mutex<CacheState>,
    capacity: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl Default for DeliveryCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl DeliveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A cache holding at most `capacity` entries (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            capacity: capacity.max(1),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn key(backend: &dyn Backend, scope: &Scope) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(backend.name().as_bytes());
        hasher.update(&[0]);
        hasher.update(backend.policy().fingerprint().as_bytes());
        hasher.update(&[0]);
        hasher.update(scope.to_string().as_bytes());
        *hasher.finalize().as_bytes()
    }

    pub fn deliver(&self, backend: &dyn Backend, scope: &Scope) -> Result<Arc<Executable>> {
        let key = Self::key(backend, scope);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.tick += 1;
        let tick = state.tick;
        if let Some(entry) = state.entries.get_mut(&key) {
            if !entry.executable.is_disposed() {
                entry.last_used = tick;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Arc::clone(&entry.executable));
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        let executable = Arc::new(backend.deliver(scope)?);

        let before = state.entries.len();
        state.entries.retain(|_, e| !e.executable.is_disposed());
        while state.entries.len() >= self.capacity {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| *k);
            match oldest {
                Some(k) => state.entries.remove(&k),
                None => break,
            };
        }
        let dropped = before - state.entries.len();
        if dropped > 0 {
            debug!(dropped, live = state.entries.len(), "evicted cached executables");
        }
        state.entries.insert(
            key,
            CacheEntry {
                executable: Arc::clone(&executable),
                last_used: tick,
            },
        );
        Ok(executable)
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// (hits, misses) so far.
    pub fn stats(&self) -> (usize, usize) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    /// Dispose and drop every entry.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for entry in state.entries.values() {
            entry.executable.dispose();
        }
        state.entries.clear();
    }
}

// ─── Registry ─────────────────────────────────────────────────────

/// Canonical backend name for an alias.
fn canonical_name(name: &str) -> &str {
    match name {
        "interpreter" => "interp",
        "cl" => "opencl",
        "javascript" => "js",
        "burn" => "tensor",
        "wgpu" => "gpu",
        other => other,
    }
}

/// Create the backend for a policy name (built-in or `policies/{name}.toml`).
pub fn create_backend(name: &str) -> Result<Arc<dyn Backend>> {
    let policy = Policy::resolve(canonical_name(name))?;
    Ok(backend_for(policy))
}

/// Create the backend that implements `policy`'s dialect. The `gpu`
/// preset runs its WGSL on a device instead of returning source.
pub fn backend_for(policy: Policy) -> Arc<dyn Backend> {
    if policy.name == "gpu" {
        return Arc::new(crate::gpu::GpuBackend::new(policy));
    }
    match policy.dialect {
        Dialect::Interpreted => Arc::new(InterpBackend::new(policy)),
        Dialect::TensorGraph => Arc::new(TensorBackend::new(policy)),
        Dialect::OpenCl | Dialect::Wgsl | Dialect::JavaScript => {
            Arc::new(crate::kir::SourceBackend::new(policy))
        }
    }
}

/// Named collection of backends.
#[derive(Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn Backend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in policy, one backend each.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for name in Policy::builtin_names() {
            if let Some(policy) = Policy::builtin(name) {
                registry.register(backend_for(policy));
            }
        }
        registry
    }

    /// Add a backend, replacing any with the same name.
    pub fn register(&mut self, backend: Arc<dyn Backend>) {
        self.backends.retain(|b| b.name() != backend.name());
        self.backends.push(backend);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Backend>> {
        let wanted = canonical_name(name);
        self.backends
            .iter()
            .find(|b| b.name() == wanted)
            .cloned()
            .ok_or_else(|| {
                EngineError::config(format!(
                    "unknown backend '{}' (registered: {})",
                    name,
                    self.names().join(", ")
                ))
            })
    }

    pub fn names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Backend>> + '_ {
        self.backends.iter()
    }
}
