//! Retargetable expression compilation and batched kernel execution.
//!
//! Describe a numeric computation once as a [`graph::Graph`], then run it
//! through the reference interpreter, emit it as OpenCL C, WGSL or
//! JavaScript, evaluate it with burn tensors or on a wgpu device, or run it
//! across many independent lanes with [`kernel::Kernel`].

pub mod api;
pub mod backend;
pub mod buffer;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod gpu;
pub mod graph;
pub mod ir;
pub mod kernel;
pub mod kir;
pub mod opt;
pub mod syntax;

// Re-exports: keep `crate::span` paths short
pub use syntax::span;

pub use api::{Defined, Delivered, Engine, EngineOptions, Lowered, Optimized};
pub use error::{EngineError, Result};
