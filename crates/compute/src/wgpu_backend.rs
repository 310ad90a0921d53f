//! GPU backend sketch. Only the integrator kernel currently has a compiled
//! shader; every other kernel still runs through `CpuBackend` in this build.
//! Wiring the remaining kernels to WGSL is future work once the kT/dT
//! pipeline's data layouts have settled.

use crate::{BufferView, ComputeBackend, ComputeError, Kernel};
use anyhow::Result;
use std::sync::Arc;
use wgpu::util::DeviceExt;

pub struct WgpuBackend {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
}

impl WgpuBackend {
    pub fn new() -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
            compatible_surface: None,
        }))
        .ok_or(anyhow::anyhow!("Failed to find an appropriate adapter"))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: None,
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        ))?;

        Ok(Self {
            device: Arc::new(device),
            queue: Arc::new(queue),
        })
    }
}

fn kernel_name(kernel: &Kernel) -> &'static str {
    match kernel {
        Kernel::SphereBinTouchCounts => "sphere_bin_touch_counts",
        Kernel::ScatterBinSpherePairs => "scatter_bin_sphere_pairs",
        Kernel::NarrowPhaseSphereContacts => "narrow_phase_sphere_contacts",
        Kernel::MapContactHistory => "map_contact_history",
        Kernel::EvaluateContactForces => "evaluate_contact_forces",
        Kernel::IntegrateOwners => "integrate_owners",
        Kernel::SegmentedReduceSum => "segmented_reduce_sum",
        Kernel::ScatterAdd => "scatter_add",
        Kernel::Gather => "gather",
    }
}

/// The only kernel currently jitified to WGSL. Layout mirrors
/// `kernels::integrate_owners::{OwnerState, IntegratorParams}` field for field.
const INTEGRATE_OWNERS_WGSL: &str = r#"
struct OwnerState {
    pos: vec3<f32>,
    mass: f32,
    vel: vec3<f32>,
    fixed: u32,
};

struct IntegratorParams {
    gravity: vec3<f32>,
    h: f32,
};

@group(0) @binding(0) var<storage, read_write> owners: array<OwnerState>;
@group(0) @binding(1) var<storage, read> forces: array<vec3<f32>>;
@group(0) @binding(2) var<uniform> params: IntegratorParams;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    if (i >= arrayLength(&owners)) {
        return;
    }
    var owner = owners[i];
    if (owner.fixed != 0u) {
        return;
    }
    let accel = forces[i] / owner.mass + params.gravity;
    owner.vel = owner.vel + accel * params.h;
    owner.pos = owner.pos + owner.vel * params.h;
    owners[i] = owner;
}
"#;

fn to_shader_source(kernel: &Kernel) -> Option<&'static str> {
    match kernel {
        Kernel::IntegrateOwners => Some(INTEGRATE_OWNERS_WGSL),
        _ => None,
    }
}

fn is_read_only(kernel: &Kernel, binding: u32) -> bool {
    let binding_count = crate::layout::binding_count(kernel);
    match kernel {
        Kernel::IntegrateOwners => binding != 0,
        Kernel::Gather | Kernel::ScatterAdd => binding == 0 || binding == 1 || binding == 3,
        _ => binding < binding_count - 1,
    }
}

fn is_uniform(kernel: &Kernel, binding: u32) -> bool {
    match kernel {
        Kernel::IntegrateOwners => binding == 2,
        _ => false,
    }
}

impl ComputeBackend for WgpuBackend {
    fn dispatch(
        &self,
        kernel: &Kernel,
        bindings: &[BufferView],
        workgroups: [u32; 3],
    ) -> Result<Vec<Vec<u8>>, ComputeError> {
        let Some(shader_source) = to_shader_source(kernel) else {
            return Err(ComputeError::NotImplemented(kernel_name(kernel)));
        };
        let shader = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(kernel_name(kernel)),
                source: wgpu::ShaderSource::Wgsl(shader_source.into()),
            });

        let mut gpu_buffers = Vec::new();
        let mut bind_group_entries = Vec::new();
        for (i, buffer_view) in bindings.iter().enumerate() {
            let buffer = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("Buffer {}", i)),
                    contents: if buffer_view.data.is_empty() {
                        &[0u8]
                    } else {
                        &buffer_view.data
                    },
                    usage: if is_uniform(kernel, i as u32) {
                        wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST
                    } else {
                        wgpu::BufferUsages::STORAGE
                            | wgpu::BufferUsages::COPY_DST
                            | wgpu::BufferUsages::COPY_SRC
                    },
                });
            gpu_buffers.push(buffer);
        }

        for (i, buffer) in gpu_buffers.iter().enumerate() {
            bind_group_entries.push(wgpu::BindGroupEntry {
                binding: i as u32,
                resource: buffer.as_entire_binding(),
            });
        }

        let bind_group_layout = self.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bind Group Layout"),
            entries: &(0..crate::layout::binding_count(kernel))
                .map(|i| wgpu::BindGroupLayoutEntry {
                    binding: i,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: if is_uniform(kernel, i) {
                            wgpu::BufferBindingType::Uniform
                        } else {
                            wgpu::BufferBindingType::Storage {
                                read_only: is_read_only(kernel, i),
                            }
                        },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                })
                .collect::<Vec<_>>(),
        });

        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bind Group"),
            layout: &bind_group_layout,
            entries: &bind_group_entries,
        });

        let pipeline_layout = self.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipeline = self.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Compute Pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: "main",
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });

        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Compute Pass"),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&pipeline);
            cpass.set_bind_group(0, &bind_group, &[]);
            cpass.dispatch_workgroups(workgroups[0], workgroups[1], workgroups[2]);
        }

        let mut output_buffers = Vec::new();
        for (i, buffer_view) in bindings.iter().enumerate() {
            if !is_read_only(kernel, i as u32) {
                let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("Staging Buffer {}", i)),
                    size: buffer_view.data.len() as u64,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                encoder.copy_buffer_to_buffer(&gpu_buffers[i], 0, &staging_buffer, 0, buffer_view.data.len() as u64);
                output_buffers.push(staging_buffer);
            }
        }

        self.queue.submit(Some(encoder.finish()));

        let mut results = Vec::new();
        for buffer in output_buffers.iter() {
            let buffer_slice = buffer.slice(..);
            let (tx, rx) = std::sync::mpsc::channel();
            buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
                tx.send(result).unwrap();
            });
            self.device.poll(wgpu::Maintain::Wait);
            rx.recv().unwrap().unwrap();
            let data = buffer_slice.get_mapped_range();
            results.push(data.to_vec());
        }

        Ok(results)
    }
}
