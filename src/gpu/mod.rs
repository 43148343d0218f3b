//! GPU execution of emitted WGSL through wgpu (Metal, Vulkan, DX12).
//!
//! `kir` writes the compute shader; this module owns the device session,
//! compiles the shader into a pipeline and dispatches lane batches.

mod session;

pub use session::GpuBackend;

use crate::error::{EngineError, Result};

/// Open the highest-performance adapter and a device with default limits.
pub fn open_device() -> Result<(wgpu::Device, wgpu::Queue)> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let options = wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    };
    let adapter = pollster::block_on(instance.request_adapter(&options))
        .ok_or_else(|| EngineError::resource("no GPU adapter available"))?;
    tracing::debug!(adapter = %adapter.get_info().name, "opened GPU adapter");

    let descriptor = wgpu::DeviceDescriptor {
        label: Some("prism-gpu"),
        required_features: wgpu::Features::empty(),
        required_limits: wgpu::Limits::default(),
        memory_hints: wgpu::MemoryHints::Performance,
    };
    pollster::block_on(adapter.request_device(&descriptor, None))
        .map_err(|e| EngineError::resource(format!("cannot open GPU device: {}", e)))
}
