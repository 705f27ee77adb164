use bytemuck::{Pod, Zeroable};
use cgmath::Matrix4;
use wgpu::util::DeviceExt;

use crate::context::GpuContext;
use crate::error::{Error, Result};

const WORKGROUP_SIZE: u32 = 256;

/// Borrowed view of the sensor collaborator's GPU point buffer: `count`
/// world-space positions stored as `vec4<f32>` (w carries through
/// untouched, sensors use it as a confidence/validity channel).
#[derive(Clone, Copy)]
pub struct PointCloud<'a> {
    pub buffer: &'a wgpu::Buffer,
    pub count: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct ConvertParams {
    world_to_workspace: [[f32; 4]; 4],
    point_count: u32,
    _pad: [u32; 3],
}

/// Re-expresses the live point cloud in workspace space.
///
/// The output buffer doubles as a consumer-visible product (visualization
/// reuses it) and as the reducer's input. The reprojection matrix is an
/// explicit per-call parameter, never ambient renderer state. The output
/// allocation grows on demand and never shrinks.
pub struct PointConverter {
    pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    params: wgpu::Buffer,
    output: wgpu::Buffer,
    capacity: u32,
}

impl PointConverter {
    pub fn new(ctx: &GpuContext) -> Self {
        let device = &ctx.device;
        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Point Convert Bind Group Layout"),
                entries: &[
                    wgpu::BindGroupLayoutEntry {
                        binding: 0,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Uniform,
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 1,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: true },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                    wgpu::BindGroupLayoutEntry {
                        binding: 2,
                        visibility: wgpu::ShaderStages::COMPUTE,
                        ty: wgpu::BindingType::Buffer {
                            ty: wgpu::BufferBindingType::Storage { read_only: false },
                            has_dynamic_offset: false,
                            min_binding_size: None,
                        },
                        count: None,
                    },
                ],
            });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Point Convert Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let shader = device.create_shader_module(wgpu::include_wgsl!("points.wgsl"));
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("Point Convert Pipeline"),
            layout: Some(&layout),
            module: &shader,
            entry_point: Some("to_workspace"),
            compilation_options: Default::default(),
            cache: None,
        });
        let params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Point Convert Params"),
            contents: bytemuck::bytes_of(&ConvertParams {
                world_to_workspace: Matrix4::from_scale(1.0f32).into(),
                point_count: 0,
                _pad: [0; 3],
            }),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let output = Self::alloc_output(device, WORKGROUP_SIZE);
        Self {
            pipeline,
            bind_group_layout,
            params,
            output,
            capacity: WORKGROUP_SIZE,
        }
    }

    fn alloc_output(device: &wgpu::Device, capacity: u32) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Workspace Point Buffer"),
            size: capacity as u64 * 16,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        })
    }

    /// Dispatch the conversion and return the workspace-space buffer. The
    /// returned reference stays valid until the next call that grows the
    /// allocation.
    pub fn convert(
        &mut self,
        ctx: &GpuContext,
        points: PointCloud<'_>,
        world_to_workspace: &Matrix4<f32>,
    ) -> Result<&wgpu::Buffer> {
        if points.count == 0 {
            return Err(Error::EmptyPointCloud);
        }
        if points.count > self.capacity {
            let capacity = points.count.next_power_of_two();
            log::debug!(
                "growing workspace point buffer: {} -> {} points",
                self.capacity,
                capacity
            );
            self.output = Self::alloc_output(&ctx.device, capacity);
            self.capacity = capacity;
        }

        ctx.queue.write_buffer(
            &self.params,
            0,
            bytemuck::bytes_of(&ConvertParams {
                world_to_workspace: (*world_to_workspace).into(),
                point_count: points.count,
                _pad: [0; 3],
            }),
        );

        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Point Convert Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: points.buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.output.as_entire_binding(),
                },
            ],
        });

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Point Convert Encoder"),
            });
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Point Convert Pass"),
                timestamp_writes: None,
            });
            cpass.set_pipeline(&self.pipeline);
            cpass.set_bind_group(0, &bind_group, &[]);
            cpass.dispatch_workgroups(points.count.div_ceil(WORKGROUP_SIZE), 1, 1);
        }
        ctx.queue.submit(Some(encoder.finish()));

        Ok(&self.output)
    }

    /// Last converted workspace-space point buffer, for visualization
    /// reuse.
    pub fn workspace_points(&self) -> &wgpu::Buffer {
        &self.output
    }
}
