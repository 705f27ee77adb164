use cgmath::{Matrix4, Point3, Transform};
use wgpu::util::DeviceExt;

use crate::context::GpuContext;
use crate::error::{Error, Result};

/// Indexed triangle mesh in model-local space, as handed over by the
/// model-loading collaborator.
#[derive(Clone, Debug, Default)]
pub struct TriangleMesh {
    pub positions: Vec<[f32; 3]>,
    pub indices: Vec<[u32; 3]>,
}

impl TriangleMesh {
    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }
}

/// GPU-resident flattened triangle list: three workspace-space `vec4`
/// positions per triangle, no indices. Triangle count is immutable after
/// upload; a re-upload fully replaces the buffer.
pub struct TriangleBuffer {
    pub(crate) buffer: wgpu::Buffer,
    pub(crate) triangle_count: u32,
}

impl TriangleBuffer {
    pub fn triangle_count(&self) -> u32 {
        self.triangle_count
    }
}

/// Transform every indexed vertex into workspace space and flatten into
/// the duplicated-vertex layout the voxelize kernel consumes.
///
/// Pure host math; the same mesh and matrix always produce identical
/// output, which is what makes re-upload idempotent. A mesh with zero
/// triangles flattens to an empty list (a degenerate target is a valid,
/// if useless, input; every volume cell then saturates at the truncation
/// distance).
pub fn flatten_triangles(
    mesh: &TriangleMesh,
    model_to_workspace: &Matrix4<f32>,
) -> Result<Vec<[f32; 4]>> {
    let vertex_count = mesh.positions.len();
    let mut flat = Vec::with_capacity(mesh.indices.len() * 3);
    for (tri, idx) in mesh.indices.iter().enumerate() {
        for &i in idx {
            let i = i as usize;
            if i >= vertex_count {
                return Err(Error::InvalidMesh(format!(
                    "triangle {tri} references vertex {i} of {vertex_count}"
                )));
            }
            let p = mesh.positions[i];
            let ws = model_to_workspace.transform_point(Point3::new(p[0], p[1], p[2]));
            flat.push([ws.x, ws.y, ws.z, 1.0]);
        }
    }
    Ok(flat)
}

/// Uploads the static target mesh into workspace space once per
/// mesh/frame change.
#[derive(Default)]
pub struct MeshUploader {
    triangles: Option<TriangleBuffer>,
}

impl MeshUploader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the triangle buffer with `mesh` transformed by
    /// `model_to_workspace`. The previous buffer, if any, is released
    /// before the new one is stored.
    pub fn upload(
        &mut self,
        ctx: &GpuContext,
        mesh: &TriangleMesh,
        model_to_workspace: &Matrix4<f32>,
    ) -> Result<()> {
        let flat = flatten_triangles(mesh, model_to_workspace)?;

        // Drop first so peak GPU memory stays at one copy.
        self.triangles = None;

        let buffer = if flat.is_empty() {
            // Zero-size buffers cannot be bound; a zero-triangle mesh
            // still gets one (never-read) slot.
            ctx.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Workspace Triangle Buffer"),
                size: 3 * 16,
                usage: wgpu::BufferUsages::STORAGE,
                mapped_at_creation: false,
            })
        } else {
            ctx.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Workspace Triangle Buffer"),
                    contents: bytemuck::cast_slice(&flat),
                    usage: wgpu::BufferUsages::STORAGE,
                })
        };
        log::debug!("uploaded {} triangles to workspace space", mesh.triangle_count());
        self.triangles = Some(TriangleBuffer {
            buffer,
            triangle_count: mesh.triangle_count() as u32,
        });
        Ok(())
    }

    pub fn triangles(&self) -> Option<&TriangleBuffer> {
        self.triangles.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::SquareMatrix;

    fn quad_mesh() -> TriangleMesh {
        TriangleMesh {
            positions: vec![
                [-0.5, 0.0, -0.5],
                [0.5, 0.0, -0.5],
                [0.5, 0.0, 0.5],
                [-0.5, 0.0, 0.5],
            ],
            indices: vec![[0, 1, 2], [0, 2, 3]],
        }
    }

    #[test]
    fn flatten_duplicates_shared_vertices() {
        let flat = flatten_triangles(&quad_mesh(), &Matrix4::identity()).unwrap();
        assert_eq!(flat.len(), 6);
        // Vertex 0 appears once per triangle that references it.
        assert_eq!(flat[0], [-0.5, 0.0, -0.5, 1.0]);
        assert_eq!(flat[3], [-0.5, 0.0, -0.5, 1.0]);
    }

    #[test]
    fn flatten_applies_the_model_matrix() {
        let shift = Matrix4::from_translation(cgmath::Vector3::new(1.0, 2.0, 3.0));
        let flat = flatten_triangles(&quad_mesh(), &shift).unwrap();
        assert_eq!(flat[1], [1.5, 2.0, 2.5, 1.0]);
    }

    #[test]
    fn flatten_twice_is_identical() {
        let mesh = quad_mesh();
        let m = Matrix4::from_scale(2.0);
        let first = flatten_triangles(&mesh, &m).unwrap();
        let second = flatten_triangles(&mesh, &m).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_mesh_flattens_to_nothing() {
        let empty = TriangleMesh::default();
        assert!(flatten_triangles(&empty, &Matrix4::identity())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let mut mesh = quad_mesh();
        mesh.indices.push([0, 1, 99]);
        assert!(matches!(
            flatten_triangles(&mesh, &Matrix4::identity()),
            Err(Error::InvalidMesh(_))
        ));
    }
}
