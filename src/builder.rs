use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::bounds::Aabb;
use crate::context::GpuContext;
use crate::error::{Error, Result};
use crate::mesh::TriangleBuffer;
use crate::volume::{DistanceVolume, SeedVolumes, Slot, VolumeDesc};

const CELL_WORKGROUP: u32 = 4;
const TRIANGLE_WORKGROUP: u32 = 256;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct VolumeParams {
    corner: [f32; 4],
    size: [f32; 4],
    resolution: u32,
    mu: f32,
    triangle_count: u32,
    _pad: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct FloodStep {
    step: u32,
    _pad: [u32; 3],
}

/// Jump-flood step schedule: descending powers of two from the highest
/// power of two at or below `resolution / 2` down to 1. A resolution
/// below 4 yields at most `[1]`; a 1-cell volume needs no flooding at
/// all.
pub(crate) fn jump_flood_steps(resolution: u32) -> Vec<u32> {
    let half = resolution / 2;
    if half == 0 {
        return Vec::new();
    }
    let mut step = 1u32 << (31 - half.leading_zeros());
    let mut steps = Vec::new();
    while step >= 1 {
        steps.push(step);
        if step == 1 {
            break;
        }
        step /= 2;
    }
    steps
}

struct FloodRound {
    bind_group: wgpu::BindGroup,
}

/// Builds one truncated-distance volume from the uploaded triangle
/// buffer: clear, centroid voxelize, jump flood, finalize, recorded as a
/// strictly ordered dispatch sequence in a single submission.
///
/// Owns the distance volume and the seed ping-pong pair for its fixed
/// resolution. The box the volume covers may change between builds; the
/// resolution cannot.
pub struct VolumeBuilder {
    clear_pipeline: wgpu::ComputePipeline,
    seed_pipeline: wgpu::ComputePipeline,
    flood_pipeline: wgpu::ComputePipeline,
    finalize_pipeline: wgpu::ComputePipeline,
    triangle_layout: wgpu::BindGroupLayout,
    params: wgpu::Buffer,
    volume_bind_group: wgpu::BindGroup,
    // Seed pairings by physical direction; the host picks per stage based
    // on which slot currently holds the freshest seeds.
    seeds_a_to_b: wgpu::BindGroup,
    seeds_b_to_a: wgpu::BindGroup,
    flood_rounds: Vec<FloodRound>,
    idle_step_bind_group: wgpu::BindGroup,
    volume: DistanceVolume,
    resolution: u32,
}

impl VolumeBuilder {
    pub fn new(ctx: &GpuContext, resolution: u32, mu: f32, bounds: Aabb) -> Result<Self> {
        if resolution == 0 {
            return Err(Error::InvalidConfig("volume resolution must be positive".into()));
        }
        let device = &ctx.device;

        let uniform_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
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

        let volume_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("SDF Volume Bind Group Layout"),
            entries: &[uniform_entry(0), storage_entry(1, false)],
        });
        let seeds_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("SDF Seeds Bind Group Layout"),
            entries: &[storage_entry(0, true), storage_entry(1, false)],
        });
        let triangle_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("SDF Triangle Bind Group Layout"),
            entries: &[storage_entry(0, true)],
        });
        let step_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("SDF Flood Step Bind Group Layout"),
            entries: &[uniform_entry(0)],
        });

        let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("SDF Build Pipeline Layout"),
            bind_group_layouts: &[&volume_layout, &seeds_layout, &triangle_layout, &step_layout],
            push_constant_ranges: &[],
        });
        let shader = device.create_shader_module(wgpu::include_wgsl!("sdf.wgsl"));
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
        let clear_pipeline = make_pipeline("SDF Clear Pipeline", "clear_cells");
        let seed_pipeline = make_pipeline("SDF Seed Pipeline", "seed_triangles");
        let flood_pipeline = make_pipeline("SDF Flood Pipeline", "jump_flood");
        let finalize_pipeline = make_pipeline("SDF Finalize Pipeline", "finalize_distances");

        let volume = DistanceVolume::new(device, VolumeDesc::new(resolution, mu, bounds));
        let seeds = SeedVolumes::new(device, resolution);

        let params = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("SDF Volume Params"),
            size: std::mem::size_of::<VolumeParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let volume_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("SDF Volume Bind Group"),
            layout: &volume_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: volume.buffer.as_entire_binding(),
                },
            ],
        });

        let seed_pair = |label, src: Slot, dst: Slot| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &seeds_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: seeds.buffer(src).as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: seeds.buffer(dst).as_entire_binding(),
                    },
                ],
            })
        };
        let seeds_a_to_b = seed_pair("SDF Seeds A->B", Slot::A, Slot::B);
        let seeds_b_to_a = seed_pair("SDF Seeds B->A", Slot::B, Slot::A);

        let make_step_bind_group = |step: u32, label: &str| {
            let uniform = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::bytes_of(&FloodStep { step, _pad: [0; 3] }),
                usage: wgpu::BufferUsages::UNIFORM,
            });
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &step_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform.as_entire_binding(),
                }],
            })
        };

        // The step schedule is a function of the fixed resolution, so the
        // per-round uniforms and bind groups are created once up front and
        // the whole flood stays inside one command submission.
        let flood_rounds = jump_flood_steps(resolution)
            .into_iter()
            .map(|step| FloodRound {
                bind_group: make_step_bind_group(step, "SDF Flood Step Bind Group"),
            })
            .collect();
        let idle_step_bind_group = make_step_bind_group(1, "SDF Idle Step Bind Group");

        Ok(Self {
            clear_pipeline,
            seed_pipeline,
            flood_pipeline,
            finalize_pipeline,
            triangle_layout,
            params,
            volume_bind_group,
            seeds_a_to_b,
            seeds_b_to_a,
            flood_rounds,
            idle_step_bind_group,
            volume,
            resolution,
        })
    }

    fn seeds_into(&self, dst: Slot) -> &wgpu::BindGroup {
        match dst {
            Slot::A => &self.seeds_b_to_a,
            Slot::B => &self.seeds_a_to_b,
        }
    }

    fn seeds_from(&self, src: Slot) -> &wgpu::BindGroup {
        match src {
            Slot::A => &self.seeds_a_to_b,
            Slot::B => &self.seeds_b_to_a,
        }
    }

    /// Rebuild the distance volume over `bounds` with truncation `mu`
    /// from the given triangle buffer. All four stages are recorded in
    /// order into one encoder; compute-pass ordering makes each stage's
    /// writes visible to the next.
    pub fn build(
        &mut self,
        ctx: &GpuContext,
        triangles: &TriangleBuffer,
        mu: f32,
        bounds: Aabb,
    ) -> Result<()> {
        if bounds.is_empty() {
            return Err(Error::DegenerateBox);
        }
        self.volume.retarget(mu, bounds);
        let desc = self.volume.desc();

        ctx.queue.write_buffer(
            &self.params,
            0,
            bytemuck::bytes_of(&VolumeParams {
                corner: [desc.corner.x, desc.corner.y, desc.corner.z, 0.0],
                size: [desc.size.x, desc.size.y, desc.size.z, 0.0],
                resolution: self.resolution,
                mu,
                triangle_count: triangles.triangle_count,
                _pad: 0,
            }),
        );

        let triangle_bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("SDF Triangle Bind Group"),
            layout: &self.triangle_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: triangles.buffer.as_entire_binding(),
            }],
        });

        let cell_groups = self.resolution.div_ceil(CELL_WORKGROUP);
        let triangle_groups = triangles.triangle_count.div_ceil(TRIANGLE_WORKGROUP).max(1);
        // Clear and voxelize both write into slot A; flooding ping-pongs
        // from there.
        let mut current = Slot::A;

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("SDF Build Encoder"),
            });
        {
            let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("SDF Build Pass"),
                timestamp_writes: None,
            });
            cpass.set_bind_group(0, &self.volume_bind_group, &[]);
            cpass.set_bind_group(2, &triangle_bind_group, &[]);
            // Every stage needs a step bind group bound to satisfy the
            // shared layout; the clear/seed/finalize stages ignore it.
            cpass.set_bind_group(3, &self.idle_step_bind_group, &[]);

            cpass.set_bind_group(1, self.seeds_into(current), &[]);
            cpass.set_pipeline(&self.clear_pipeline);
            cpass.dispatch_workgroups(cell_groups, cell_groups, cell_groups);

            cpass.set_pipeline(&self.seed_pipeline);
            cpass.dispatch_workgroups(triangle_groups, 1, 1);

            cpass.set_pipeline(&self.flood_pipeline);
            for round in &self.flood_rounds {
                cpass.set_bind_group(1, self.seeds_from(current), &[]);
                cpass.set_bind_group(3, &round.bind_group, &[]);
                cpass.dispatch_workgroups(cell_groups, cell_groups, cell_groups);
                current = current.other();
            }

            // Finalize reads whichever buffer the last round left
            // current; the index flip above replaced any extra copy.
            cpass.set_bind_group(1, self.seeds_from(current), &[]);
            cpass.set_pipeline(&self.finalize_pipeline);
            cpass.dispatch_workgroups(cell_groups, cell_groups, cell_groups);
        }
        ctx.queue.submit(Some(encoder.finish()));

        log::debug!(
            "built {}^3 volume over corner {:?} size {:?} ({} flood rounds, {} triangles)",
            self.resolution,
            desc.corner,
            desc.size,
            self.flood_rounds.len(),
            triangles.triangle_count
        );
        self.volume.is_valid = true;
        Ok(())
    }

    pub fn volume(&self) -> &DistanceVolume {
        &self.volume
    }

    /// Host copy of every cell distance, in x-fastest cell order. A
    /// readback synchronization point; meant for consumers (and tests)
    /// that inspect volumes on the CPU.
    pub fn read_distances(&self, ctx: &GpuContext) -> Result<Vec<f32>> {
        let size = self.volume.desc().cell_count() * std::mem::size_of::<f32>() as u64;
        let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("SDF Readback Staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("SDF Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(&self.volume.buffer, 0, &staging, 0, size);
        ctx.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = ctx.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| Error::BufferMap("channel closed".into()))?
            .map_err(|e| Error::BufferMap(format!("{e:?}")))?;
        let data = slice.get_mapped_range();
        let values = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging.unmap();
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_schedule_halves_down_to_one() {
        assert_eq!(jump_flood_steps(64), vec![32, 16, 8, 4, 2, 1]);
        assert_eq!(jump_flood_steps(48), vec![16, 8, 4, 2, 1]);
        assert_eq!(jump_flood_steps(8), vec![4, 2, 1]);
    }

    #[test]
    fn step_schedule_small_resolutions() {
        assert_eq!(jump_flood_steps(2), vec![1]);
        assert_eq!(jump_flood_steps(3), vec![1]);
        assert_eq!(jump_flood_steps(1), Vec::<u32>::new());
    }

    #[test]
    fn final_slot_parity_matches_round_count() {
        // An even number of rounds lands the result back in slot A, an
        // odd number in slot B; the builder reads whichever is current
        // instead of copying.
        for resolution in [2u32, 8, 16, 64, 100] {
            let rounds = jump_flood_steps(resolution).len();
            let mut slot = Slot::A;
            for _ in 0..rounds {
                slot = slot.other();
            }
            let expected = if rounds % 2 == 0 { Slot::A } else { Slot::B };
            assert_eq!(slot, expected);
        }
    }
}
