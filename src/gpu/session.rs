//! The `gpu` backend: emitted WGSL run through one shared wgpu session.
//!
//! The device is opened on first delivery and kept for the backend's
//! lifetime. Every dispatch holds the session lock, so executables from
//! one backend never interleave their queue submissions. Disposing an
//! executable drops its pipeline and its hold on the session.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;
use wgpu::util::DeviceExt;

use crate::backend::{
    Backend, Executable, InstructionSet, LaneBatch, LaneInput, LaneResults, Signature,
};
use crate::buffer::{narrow, widen};
use crate::config::Policy;
use crate::error::{EngineError, Result};
use crate::graph::{Shape, Value};
use crate::ir::Scope;
use crate::kir;

struct Session {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

type SharedSession = Arc<Mutex<Session>>;

pub struct GpuBackend {
    policy: Policy,
    session: Mutex<Option<SharedSession>>,
}

impl GpuBackend {
    pub fn new(policy: Policy) -> Self {
        Self {
            policy,
            session: Mutex::new(None),
        }
    }

    fn session(&self) -> Result<SharedSession> {
        let mut slot = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = slot.as_ref() {
            return Ok(Arc::clone(session));
        }
        let (device, queue) = super::open_device()?;
        let session = Arc::new(Mutex::new(Session { device, queue }));
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }
}

impl Backend for GpuBackend {
    fn name(&self) -> &str {
        &self.policy.name
    }

    fn policy(&self) -> &Policy {
        &self.policy
    }

    fn deliver(&self, scope: &Scope) -> Result<Executable> {
        let source = kir::emit_kernel(&self.policy, scope)?;
        let signature = Signature::of(scope)?;
        if let Some(p) = signature.parameters.iter().find(|p| p.shape.size() == 0) {
            return Err(EngineError::compile(format!(
                "argument '{}' is empty; GPU bindings need at least one element",
                p.label
            )));
        }

        let session = self.session()?;
        let pipeline = {
            let guard = session.lock().unwrap_or_else(PoisonError::into_inner);
            let device = &guard.device;
            device.push_error_scope(wgpu::ErrorFilter::Validation);
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(scope.name.as_str()),
                source: wgpu::ShaderSource::Wgsl(source.as_str().into()),
            });
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(scope.name.as_str()),
                layout: None,
                module: &module,
                entry_point: Some(scope.name.as_str()),
                compilation_options: Default::default(),
                cache: None,
            });
            if let Some(err) = pollster::block_on(device.pop_error_scope()) {
                return Err(EngineError::compile(format!(
                    "WGSL for '{}' rejected: {}",
                    scope.name, err
                )));
            }
            pipeline
        };
        debug!(backend = %self.policy.name, kernel = %scope.name, "compiled GPU pipeline");

        let program = GpuKernel {
            compiled: Mutex::new(Some(Compiled { session, pipeline })),
            parameters: signature.parameters.iter().map(|p| p.shape.clone()).collect(),
            outputs: signature.outputs.clone(),
            record_len: signature.output_len(),
            workgroup_size: self.policy.workgroup_size,
        };
        Ok(Executable::new(&self.policy.name, signature, Box::new(program)).with_source(source))
    }
}

/// Device-side state of one executable, released on dispose.
struct Compiled {
    session: SharedSession,
    pipeline: wgpu::ComputePipeline,
}

struct GpuKernel {
    compiled: Mutex<Option<Compiled>>,
    parameters: Vec<Shape>,
    outputs: Vec<Shape>,
    record_len: usize,
    workgroup_size: u32,
}

/// One argument as uploaded: flat data plus its per-lane stride.
struct Upload {
    data: Vec<f32>,
    stride: u32,
}

fn storage_bytes(data: &[f32]) -> Vec<u8> {
    if data.is_empty() {
        vec![0; 4]
    } else {
        bytemuck::cast_slice(data).to_vec()
    }
}

fn to_u32(n: usize, what: &str) -> Result<u32> {
    u32::try_from(n).map_err(|_| EngineError::resource(format!("{} {} exceeds u32", what, n)))
}

impl GpuKernel {
    fn run(&self, uploads: &[Upload], lanes: usize) -> Result<(Vec<f32>, Vec<u32>)> {
        let lanes_u32 = to_u32(lanes, "lane count")?;
        let compiled = self.compiled.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(Compiled { session, pipeline }) = compiled.as_ref() else {
            return Err(EngineError::usage("GPU kernel run after its pipeline was released"));
        };
        let guard = session.lock().unwrap_or_else(PoisonError::into_inner);
        let Session { device, queue } = &*guard;

        let limits = device.limits();
        let out_bytes = (lanes * self.record_len * 4).max(4) as u64;
        let status_bytes = (lanes * 4).max(4) as u64;
        let max_binding = limits.max_storage_buffer_binding_size as u64;
        if out_bytes > max_binding {
            return Err(EngineError::resource(format!(
                "{} output bytes exceed the device binding limit of {}",
                out_bytes, max_binding
            )));
        }

        let inputs: Vec<wgpu::Buffer> = uploads
            .iter()
            .map(|u| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("prism_input"),
                    contents: &storage_bytes(&u.data),
                    usage: wgpu::BufferUsages::STORAGE,
                })
            })
            .collect();

        let mut meta: Vec<u32> = vec![lanes_u32, 0];
        meta.extend(uploads.iter().map(|u| u.stride));
        let meta_buf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("prism_meta"),
            contents: bytemuck::cast_slice(&meta),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
        });
        let out_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("prism_out"),
            size: out_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let status_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("prism_status"),
            size: status_bytes,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let out_staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("prism_out_staging"),
            size: out_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let status_staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("prism_status_staging"),
            size: status_bytes,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let meta_binding = kir::wgsl::meta_binding(inputs.len());
        let mut entries: Vec<wgpu::BindGroupEntry> = inputs
            .iter()
            .enumerate()
            .map(|(i, buf)| wgpu::BindGroupEntry {
                binding: i as u32,
                resource: buf.as_entire_binding(),
            })
            .collect();
        for (offset, buf) in [&meta_buf, &out_buf, &status_buf].into_iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: meta_binding + offset as u32,
                resource: buf.as_entire_binding(),
            });
        }
        let layout = pipeline.get_bind_group_layout(0);
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("prism_bind_group"),
            layout: &layout,
            entries: &entries,
        });

        // The grid is capped per dimension; long batches go in chunks,
        // each offset by the base lane in `_meta[1]`.
        let wg = self.workgroup_size.max(1);
        let lanes_per_chunk = limits.max_compute_workgroups_per_dimension.saturating_mul(wg);
        let mut base = 0u32;
        while base < lanes_u32 {
            let chunk = lanes_per_chunk.min(lanes_u32 - base);
            queue.write_buffer(&meta_buf, 4, bytemuck::bytes_of(&base));
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("prism_encoder"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("prism_pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(chunk.div_ceil(wg), 1, 1);
            }
            queue.submit(std::iter::once(encoder.finish()));
            base += chunk;
        }

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("prism_readback"),
        });
        encoder.copy_buffer_to_buffer(&out_buf, 0, &out_staging, 0, out_bytes);
        encoder.copy_buffer_to_buffer(&status_buf, 0, &status_staging, 0, status_bytes);
        queue.submit(std::iter::once(encoder.finish()));

        let out: Vec<f32> = read_mapped(device, &out_staging)?;
        let status: Vec<u32> = read_mapped(device, &status_staging)?;
        Ok((
            out[..lanes * self.record_len].to_vec(),
            status[..lanes].to_vec(),
        ))
    }
}

fn read_mapped<T: bytemuck::Pod>(device: &wgpu::Device, buffer: &wgpu::Buffer) -> Result<Vec<T>> {
    let slice = buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    rx.recv()
        .map_err(|_| EngineError::resource("GPU readback channel closed"))?
        .map_err(|e| EngineError::resource(format!("GPU readback failed: {}", e)))?;
    let values = {
        let data = slice.get_mapped_range();
        bytemuck::cast_slice::<u8, T>(&data).to_vec()
    };
    buffer.unmap();
    Ok(values)
}

impl InstructionSet for GpuKernel {
    fn invoke(&self, arguments: &[Value]) -> Result<Vec<Value>> {
        let uploads: Vec<Upload> = arguments
            .iter()
            .map(|v| Upload {
                data: narrow(v.data()),
                stride: 0,
            })
            .collect();
        let (out, status) = self.run(&uploads, 1)?;
        if status.first() != Some(&1) {
            return Err(EngineError::undefined("lane undefined on the device"));
        }
        let mut offset = 0;
        self.outputs
            .iter()
            .map(|shape| {
                let size = shape.size();
                let data = widen(&out[offset..offset + size]);
                offset += size;
                Value::new(shape.clone(), data)
            })
            .collect()
    }

    fn invoke_lanes(&self, batch: &LaneBatch<'_>, record_len: usize) -> Result<LaneResults> {
        let lanes = batch.lanes();
        if lanes == 0 {
            return Ok(LaneResults {
                record_len,
                data: Vec::new(),
                defined: Vec::new(),
            });
        }
        let uploads = batch
            .inputs()
            .iter()
            .zip(&self.parameters)
            .map(|(input, shape)| {
                Ok(match input {
                    LaneInput::Varying(data) => Upload {
                        data: narrow(data),
                        stride: to_u32(shape.size(), "record size")?,
                    },
                    LaneInput::Invariant(v) => Upload {
                        data: narrow(v.data()),
                        stride: 0,
                    },
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let (out, status) = self.run(&uploads, lanes)?;
        let defined: Vec<bool> = status.iter().map(|&s| s == 1).collect();
        let mut data = widen(&out);
        for (lane, ok) in defined.iter().enumerate() {
            if !ok {
                data[lane * record_len..(lane + 1) * record_len].fill(f64::NAN);
            }
        }
        Ok(LaneResults {
            record_len,
            data,
            defined,
        })
    }

    fn release(&self) {
        let released = self
            .compiled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if released.is_some() {
            debug!("released GPU pipeline");
        }
    }
}
