use cgmath::Vector3;

/// Closed axis-aligned bounding box in workspace space.
///
/// `min`/`max` are both inclusive; a box is usable as a volume target only
/// when every axis has strictly positive extent (see [`Aabb::is_empty`]).
/// All candidate-box arithmetic for the local volume (margin expansion,
/// minimum extent, workspace clamp) lives here as pure host math so the
/// numerically sensitive steps are testable without a device.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Vector3<f32>,
    pub max: Vector3<f32>,
}

impl Aabb {
    pub fn new(min: Vector3<f32>, max: Vector3<f32>) -> Self {
        Self { min, max }
    }

    pub fn from_corner_size(corner: Vector3<f32>, size: Vector3<f32>) -> Self {
        Self { min: corner, max: corner + size }
    }

    /// Smallest box containing every point. Returns `None` for an empty
    /// slice; a single point yields a zero-size box.
    pub fn from_points(points: &[Vector3<f32>]) -> Option<Self> {
        let first = *points.first()?;
        let mut aabb = Self { min: first, max: first };
        for p in &points[1..] {
            aabb.min = Vector3::new(aabb.min.x.min(p.x), aabb.min.y.min(p.y), aabb.min.z.min(p.z));
            aabb.max = Vector3::new(aabb.max.x.max(p.x), aabb.max.y.max(p.y), aabb.max.z.max(p.z));
        }
        Some(aabb)
    }

    pub fn corner(&self) -> Vector3<f32> {
        self.min
    }

    pub fn size(&self) -> Vector3<f32> {
        self.max - self.min
    }

    pub fn center(&self) -> Vector3<f32> {
        (self.min + self.max) * 0.5
    }

    /// True when any axis has zero or negative extent. An empty box must
    /// never reach voxel-size derivation (division by extent).
    pub fn is_empty(&self) -> bool {
        let s = self.size();
        s.x <= 0.0 || s.y <= 0.0 || s.z <= 0.0
    }

    /// Grow the box by `margin` on every side.
    pub fn expand(&self, margin: f32) -> Self {
        let m = Vector3::new(margin, margin, margin);
        Self { min: self.min - m, max: self.max + m }
    }

    /// Enforce a minimum extent per axis by growing symmetrically around
    /// the center. Axes already at or above `min_extent` are untouched, so
    /// a degenerate single-point box becomes a `min_extent` cube.
    pub fn with_min_extent(&self, min_extent: f32) -> Self {
        let size = self.size();
        let center = self.center();
        let mut min = self.min;
        let mut max = self.max;
        for axis in 0..3 {
            if size[axis] < min_extent {
                min[axis] = center[axis] - min_extent * 0.5;
                max[axis] = center[axis] + min_extent * 0.5;
            }
        }
        Self { min, max }
    }

    /// Clamp both corners into `outer` component-wise. A box extending
    /// past `outer` on all sides collapses to exactly `outer`; the result
    /// never reaches outside it.
    pub fn clamp_to(&self, outer: &Aabb) -> Self {
        let mut min = self.min;
        let mut max = self.max;
        for axis in 0..3 {
            min[axis] = min[axis].clamp(outer.min[axis], outer.max[axis]);
            max[axis] = max[axis].clamp(outer.min[axis], outer.max[axis]);
        }
        Self { min, max }
    }
}
