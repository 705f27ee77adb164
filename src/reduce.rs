use bytemuck::{Pod, Zeroable};
use cgmath::Vector3;
use wgpu::util::DeviceExt;

use crate::bounds::Aabb;
use crate::context::GpuContext;
use crate::error::{Error, Result};

const GROUP_SIZE: u32 = 256;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct ReduceParams {
    item_count: u32,
    _pad: [u32; 3],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct MinMaxPair {
    min: [f32; 4],
    max: [f32; 4],
}

/// Two-phase GPU reduction computing the point cloud's workspace-space
/// AABB for arbitrary point counts.
///
/// Round one folds the raw points into one (min, max) pair per 256-point
/// group; subsequent rounds fold the pair array the same way, ping-ponging
/// between two private scratch buffers, until one pair remains. That pair
/// is copied to a staging buffer and read back, which stalls the calling
/// thread until the GPU has produced it. Scratch allocations grow on
/// demand and never shrink.
pub struct BoundsReducer {
    points_pipeline: wgpu::ComputePipeline,
    pairs_pipeline: wgpu::ComputePipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    scratch: [wgpu::Buffer; 2],
    staging: wgpu::Buffer,
    pair_capacity: u32,
}

impl BoundsReducer {
    pub fn new(ctx: &GpuContext) -> Self {
        let device = &ctx.device;
        let storage_entry = |binding, read_only| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Bounds Reduce Bind Group Layout"),
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
                    storage_entry(1, true),
                    storage_entry(2, true),
                    storage_entry(3, false),
                ],
            });
        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Bounds Reduce Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });
        let shader = device.create_shader_module(wgpu::include_wgsl!("reduce.wgsl"));
        let make_pipeline = |label, entry_point| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(label),
                layout: Some(&layout),
                module: &shader,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
        };
        let points_pipeline = make_pipeline("Bounds Reduce Points Pipeline", "reduce_points");
        let pairs_pipeline = make_pipeline("Bounds Reduce Pairs Pipeline", "reduce_pairs");

        let pair_capacity = GROUP_SIZE;
        let scratch = [
            Self::alloc_scratch(device, pair_capacity, "Bounds Scratch A"),
            Self::alloc_scratch(device, pair_capacity, "Bounds Scratch B"),
        ];
        let staging = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Bounds Staging Buffer"),
            size: std::mem::size_of::<MinMaxPair>() as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            points_pipeline,
            pairs_pipeline,
            bind_group_layout,
            scratch,
            staging,
            pair_capacity,
        }
    }

    fn alloc_scratch(device: &wgpu::Device, pairs: u32, label: &str) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: pairs as u64 * std::mem::size_of::<MinMaxPair>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        })
    }

    /// Reduce `point_count` points (workspace-space `vec4` positions in
    /// `points`) to their exact coordinate-wise AABB.
    pub fn compute_aabb(
        &mut self,
        ctx: &GpuContext,
        points: &wgpu::Buffer,
        point_count: u32,
    ) -> Result<Aabb> {
        if point_count == 0 {
            return Err(Error::EmptyPointCloud);
        }

        let first_round_pairs = point_count.div_ceil(GROUP_SIZE);
        if first_round_pairs > self.pair_capacity {
            let capacity = first_round_pairs.next_power_of_two();
            log::debug!(
                "growing bounds scratch: {} -> {} pairs",
                self.pair_capacity,
                capacity
            );
            self.scratch = [
                Self::alloc_scratch(&ctx.device, capacity, "Bounds Scratch A"),
                Self::alloc_scratch(&ctx.device, capacity, "Bounds Scratch B"),
            ];
            self.pair_capacity = capacity;
        }

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Bounds Reduce Encoder"),
            });

        // Round 0 folds points into scratch[0]; later rounds ping-pong
        // between the scratch pair. `current` tracks the last-written
        // scratch index.
        let mut current = 0usize;
        let mut items = point_count;
        let mut round = 0u32;
        loop {
            let groups = items.div_ceil(GROUP_SIZE);
            let params = ctx
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Bounds Reduce Params"),
                    contents: bytemuck::bytes_of(&ReduceParams {
                        item_count: items,
                        _pad: [0; 3],
                    }),
                    usage: wgpu::BufferUsages::UNIFORM,
                });
            let (pairs_in, pairs_out) = if round == 0 {
                // The pairs_in binding is unused by reduce_points; bind
                // the other scratch to satisfy the layout.
                (&self.scratch[1], &self.scratch[0])
            } else {
                (&self.scratch[current], &self.scratch[1 - current])
            };
            let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Bounds Reduce Bind Group"),
                layout: &self.bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: params.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: points.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: pairs_in.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 3,
                        resource: pairs_out.as_entire_binding(),
                    },
                ],
            });
            {
                let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("Bounds Reduce Pass"),
                    timestamp_writes: None,
                });
                if round == 0 {
                    cpass.set_pipeline(&self.points_pipeline);
                } else {
                    cpass.set_pipeline(&self.pairs_pipeline);
                }
                cpass.set_bind_group(0, &bind_group, &[]);
                cpass.dispatch_workgroups(groups, 1, 1);
            }
            if round == 0 {
                current = 0;
            } else {
                current = 1 - current;
            }
            items = groups;
            round += 1;
            if items == 1 {
                break;
            }
        }

        encoder.copy_buffer_to_buffer(
            &self.scratch[current],
            0,
            &self.staging,
            0,
            std::mem::size_of::<MinMaxPair>() as u64,
        );
        ctx.queue.submit(Some(encoder.finish()));

        let pair = self.read_back(ctx)?;
        Ok(Aabb::new(
            Vector3::new(pair.min[0], pair.min[1], pair.min[2]),
            Vector3::new(pair.max[0], pair.max[1], pair.max[2]),
        ))
    }

    fn read_back(&self, ctx: &GpuContext) -> Result<MinMaxPair> {
        let slice = self.staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = ctx.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| Error::BufferMap("channel closed".into()))?
            .map_err(|e| Error::BufferMap(format!("{e:?}")))?;
        let data = slice.get_mapped_range();
        let pair: MinMaxPair = *bytemuck::from_bytes(&data);
        drop(data);
        self.staging.unmap();
        Ok(pair)
    }
}
