//! wgpu implementation of [`ForceBackend`]
//!
//! Forces are computed on the GPU and read back; integration stays on the
//! CPU so both backends share one set of integration rules.

use wgpu::util::DeviceExt;

use super::shaders::force_shader;
use super::types::{GpuParams, WORKGROUP_SIZE};
use crate::config::ForceParams;
use crate::error::{LayoutError, Result};
use crate::geometry::Vec2;
use crate::graph::LevelEdge;
use crate::kernel::{Adjacency, ForceBackend};

/// Storage buffers for one level size; grown on demand, never shrunk
struct LevelBuffers {
    node_capacity: usize,
    neighbor_capacity: usize,
    positions: wgpu::Buffer,
    offsets: wgpu::Buffer,
    neighbors: wgpu::Buffer,
    forces: wgpu::Buffer,
    staging: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

pub struct GpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    params_buffer: wgpu::Buffer,
    buffers: Option<LevelBuffers>,
}

impl GpuBackend {
    /// Acquire an adapter and device and compile the force pipeline.
    pub fn new() -> Result<Self> {
        let (device, queue) = pollster::block_on(Self::create_device())?;
        Ok(Self::with_device(device, queue))
    }

    pub fn with_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Force Accumulation Shader"),
            source: wgpu::ShaderSource::Wgsl(force_shader().into()),
        });

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Force Accumulation Bind Group Layout"),
            entries: &[
                storage(0, true),
                storage(1, true),
                storage(2, true),
                storage(3, false),
                wgpu::BindGroupLayoutEntry {
                    binding: 4,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Force Accumulation Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Force Accumulation Pipeline"),
            layout: Some(&pipeline_layout),
            module: &module,
            entry_point: Some("accumulate"),
            compilation_options: Default::default(),
            cache: None,
        });

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Force Params Buffer"),
            contents: bytemuck::bytes_of(&GpuParams::new(&ForceParams::default(), 0, 1.0)),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        Self {
            device,
            queue,
            pipeline,
            bind_group_layout,
            params_buffer,
            buffers: None,
        }
    }

    async fn create_device() -> Result<(wgpu::Device, wgpu::Queue)> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| LayoutError::GpuUnavailable("no suitable adapter".to_string()))?;

        tracing::info!(adapter = %adapter.get_info().name, "using GPU force backend");

        adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Layout Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|err| LayoutError::GpuUnavailable(err.to_string()))
    }

    fn ensure_buffers(&mut self, nodes: usize, neighbors: usize) {
        if let Some(b) = &self.buffers {
            if b.node_capacity >= nodes && b.neighbor_capacity >= neighbors {
                return;
            }
        }

        let node_capacity = nodes.max(1).next_power_of_two();
        let neighbor_capacity = neighbors.max(1).next_power_of_two();
        tracing::debug!(node_capacity, neighbor_capacity, "allocating GPU buffers");

        let vec2_bytes = (node_capacity * std::mem::size_of::<Vec2>()) as u64;
        let storage = |label: &str, size: u64, extra: wgpu::BufferUsages| {
            self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: size.max(16),
                usage: wgpu::BufferUsages::STORAGE | extra,
                mapped_at_creation: false,
            })
        };

        let positions = storage("Positions", vec2_bytes, wgpu::BufferUsages::COPY_DST);
        let offsets = storage(
            "Adjacency Offsets",
            ((node_capacity + 1) * 4) as u64,
            wgpu::BufferUsages::COPY_DST,
        );
        let neighbor_buffer = storage(
            "Adjacency Neighbors",
            (neighbor_capacity * 4) as u64,
            wgpu::BufferUsages::COPY_DST,
        );
        let forces = storage("Forces", vec2_bytes, wgpu::BufferUsages::COPY_SRC);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Force Staging Buffer"),
            size: vec2_bytes.max(16),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Force Accumulation Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: positions.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: offsets.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: neighbor_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: forces.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: self.params_buffer.as_entire_binding(),
                },
            ],
        });

        self.buffers = Some(LevelBuffers {
            node_capacity,
            neighbor_capacity,
            positions,
            offsets,
            neighbors: neighbor_buffer,
            forces,
            staging,
            bind_group,
        });
    }
}

impl ForceBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "gpu"
    }

    fn accumulate(
        &mut self,
        positions: &[Vec2],
        edges: &[LevelEdge],
        params: &ForceParams,
        temperature: f32,
        forces: &mut [Vec2],
    ) -> Result<()> {
        let n = positions.len();
        if n == 0 {
            return Ok(());
        }
        let adjacency = Adjacency::from_edges(n, edges);
        self.ensure_buffers(n, adjacency.neighbors.len());
        let buffers = self
            .buffers
            .as_ref()
            .ok_or_else(|| LayoutError::GpuUnavailable("buffers not allocated".to_string()))?;

        let uniforms = GpuParams::new(params, n as u32, temperature);
        self.queue
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&uniforms));
        self.queue
            .write_buffer(&buffers.positions, 0, bytemuck::cast_slice(positions));
        self.queue
            .write_buffer(&buffers.offsets, 0, bytemuck::cast_slice(&adjacency.offsets));
        if !adjacency.neighbors.is_empty() {
            self.queue
                .write_buffer(&buffers.neighbors, 0, bytemuck::cast_slice(&adjacency.neighbors));
        }

        let force_bytes = std::mem::size_of_val(forces) as u64;
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Force Accumulation Encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Force Accumulation Pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &buffers.bind_group, &[]);
            pass.dispatch_workgroups((n as u32).div_ceil(WORKGROUP_SIZE), 1, 1);
        }
        encoder.copy_buffer_to_buffer(&buffers.forces, 0, &buffers.staging, 0, force_bytes);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = buffers.staging.slice(..force_bytes);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| LayoutError::GpuUnavailable("readback channel closed".to_string()))?
            .map_err(|err| LayoutError::GpuUnavailable(err.to_string()))?;

        {
            let data = slice.get_mapped_range();
            forces.copy_from_slice(bytemuck::cast_slice(&data));
        }
        buffers.staging.unmap();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::CpuBackend;

    #[test]
    fn matches_cpu_forces() {
        let Ok(mut gpu) = GpuBackend::new() else {
            eprintln!("no GPU adapter, skipping");
            return;
        };

        let positions: Vec<Vec2> = (0..40)
            .map(|i| {
                let t = i as f32 * 0.9;
                Vec2::new(t.cos() * (4.0 + 2.0 * t), t.sin() * (4.0 + 2.0 * t))
            })
            .collect();
        let edges: Vec<LevelEdge> = (1..40)
            .map(|b| LevelEdge {
                a: b - 1,
                b,
                weight: 1.0,
            })
            .collect();
        let params = ForceParams::default();

        let mut expected = vec![Vec2::ZERO; 40];
        let mut actual = vec![Vec2::ZERO; 40];
        CpuBackend::default()
            .accumulate(&positions, &edges, &params, 0.5, &mut expected)
            .unwrap();
        gpu.accumulate(&positions, &edges, &params, 0.5, &mut actual)
            .unwrap();

        for (e, a) in expected.iter().zip(&actual) {
            let scale = e.length().max(1.0);
            assert!((*e - *a).length() / scale < 1e-3, "{e:?} vs {a:?}");
        }
    }
}
