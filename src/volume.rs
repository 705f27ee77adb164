use cgmath::Vector3;

use crate::bounds::Aabb;

/// Box metadata for one cubic distance volume.
///
/// `resolution` is fixed for the lifetime of the volume it describes;
/// `corner`/`size` (workspace space) may be retargeted between builds
/// without reallocating. A cell's workspace position is
/// `corner + (index + 0.5) / resolution * size`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VolumeDesc {
    pub resolution: u32,
    pub mu: f32,
    pub corner: Vector3<f32>,
    pub size: Vector3<f32>,
}

impl VolumeDesc {
    pub fn new(resolution: u32, mu: f32, bounds: Aabb) -> Self {
        Self {
            resolution,
            mu,
            corner: bounds.corner(),
            size: bounds.size(),
        }
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_corner_size(self.corner, self.size)
    }

    pub fn cell_count(&self) -> u64 {
        (self.resolution as u64).pow(3)
    }

    /// Workspace-space center of cell `(i, j, k)`.
    pub fn voxel_center(&self, i: u32, j: u32, k: u32) -> Vector3<f32> {
        let r = self.resolution as f32;
        Vector3::new(
            self.corner.x + (i as f32 + 0.5) / r * self.size.x,
            self.corner.y + (j as f32 + 0.5) / r * self.size.y,
            self.corner.z + (k as f32 + 0.5) / r * self.size.z,
        )
    }

    pub fn contains(&self, p: Vector3<f32>) -> bool {
        let end = self.corner + self.size;
        p.x >= self.corner.x
            && p.y >= self.corner.y
            && p.z >= self.corner.z
            && p.x <= end.x
            && p.y <= end.y
            && p.z <= end.z
    }

    /// Map a workspace-space point into `[0, 1]^3` volume coordinates.
    /// Only meaningful for points inside the box and a non-empty size.
    pub fn to_normalized(&self, p: Vector3<f32>) -> Vector3<f32> {
        Vector3::new(
            (p.x - self.corner.x) / self.size.x,
            (p.y - self.corner.y) / self.size.y,
            (p.z - self.corner.z) / self.size.z,
        )
    }
}

/// GPU-resident cubic grid of truncated unsigned distances.
///
/// Owned exclusively by the builder that allocated it; consumers only ever
/// see it through the read-only [`SdfVolumeData`] view. `is_valid` flips
/// to true the first time a build completes and the volume stays queryable
/// from then on; rebuilds replace cell contents wholesale, never leaving a
/// torn state observable through the accessor.
pub struct DistanceVolume {
    pub(crate) buffer: wgpu::Buffer,
    pub(crate) desc: VolumeDesc,
    pub(crate) is_valid: bool,
}

impl DistanceVolume {
    pub(crate) fn new(device: &wgpu::Device, desc: VolumeDesc) -> Self {
        let size = desc.cell_count() * std::mem::size_of::<f32>() as u64;
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Distance Volume"),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            desc,
            is_valid: false,
        }
    }

    /// Point the volume at a new box. Resolution (and therefore the
    /// allocation) is unchanged.
    pub(crate) fn retarget(&mut self, mu: f32, bounds: Aabb) {
        self.desc.mu = mu;
        self.desc.corner = bounds.corner();
        self.desc.size = bounds.size();
    }

    pub fn desc(&self) -> VolumeDesc {
        self.desc
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn data(&self) -> SdfVolumeData<'_> {
        SdfVolumeData {
            buffer: &self.buffer,
            desc: self.desc,
        }
    }
}

/// Read-only consumer view over one built distance volume: the cell
/// buffer plus the box metadata needed to sample it.
#[derive(Clone, Copy)]
pub struct SdfVolumeData<'a> {
    pub buffer: &'a wgpu::Buffer,
    pub desc: VolumeDesc,
}

impl SdfVolumeData<'_> {
    pub fn contains(&self, p: Vector3<f32>) -> bool {
        self.desc.contains(p)
    }

    pub fn workspace_to_normalized(&self, p: Vector3<f32>) -> Vector3<f32> {
        self.desc.to_normalized(p)
    }
}

/// Which seed buffer currently holds the freshest data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Slot {
    A,
    B,
}

impl Slot {
    pub(crate) fn other(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }
}

/// Ping-pong pair of seed grids used only during a build pass.
///
/// Each cell is a `vec4`: xyz the best-known nearest surface sample, w a
/// validity flag. The builder flips a [`Slot`] index between flood rounds
/// to select source and destination; cell data is never copied between
/// the pair.
pub(crate) struct SeedVolumes {
    a: wgpu::Buffer,
    b: wgpu::Buffer,
}

impl SeedVolumes {
    pub(crate) fn new(device: &wgpu::Device, resolution: u32) -> Self {
        let size = (resolution as u64).pow(3) * 16;
        let make = |label| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::STORAGE,
                mapped_at_creation: false,
            })
        };
        Self {
            a: make("Seed Volume A"),
            b: make("Seed Volume B"),
        }
    }

    pub(crate) fn buffer(&self, slot: Slot) -> &wgpu::Buffer {
        match slot {
            Slot::A => &self.a,
            Slot::B => &self.b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(x: f32, y: f32, z: f32) -> Vector3<f32> {
        Vector3::new(x, y, z)
    }

    fn unit_desc(resolution: u32) -> VolumeDesc {
        VolumeDesc {
            resolution,
            mu: 0.05,
            corner: v(-0.5, -0.5, -0.5),
            size: v(1.0, 1.0, 1.0),
        }
    }

    #[test]
    fn voxel_centers_sit_half_a_cell_in() {
        let desc = unit_desc(10);
        let c = desc.voxel_center(0, 0, 0);
        assert!((c.x - -0.45).abs() < 1e-6);
        let c = desc.voxel_center(9, 9, 9);
        assert!((c.x - 0.45).abs() < 1e-6);
    }

    #[test]
    fn contains_is_inclusive_at_faces() {
        let desc = unit_desc(8);
        assert!(desc.contains(v(-0.5, 0.0, 0.0)));
        assert!(desc.contains(v(0.5, 0.5, 0.5)));
        assert!(!desc.contains(v(0.51, 0.0, 0.0)));
    }

    #[test]
    fn normalized_coordinates_span_unit_cube() {
        let desc = unit_desc(8);
        let n = desc.to_normalized(v(-0.5, 0.0, 0.5));
        assert!((n.x - 0.0).abs() < 1e-6);
        assert!((n.y - 0.5).abs() < 1e-6);
        assert!((n.z - 1.0).abs() < 1e-6);
    }

    #[test]
    fn slot_other_alternates() {
        assert_eq!(Slot::A.other(), Slot::B);
        assert_eq!(Slot::B.other().other(), Slot::B);
    }
}
