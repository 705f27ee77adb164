//! Device-backed tests for the compute kernels. Every test acquires its
//! own context and skips cleanly when the machine has no usable adapter.

use cgmath::{Matrix4, SquareMatrix, Vector3};
use wgpu::util::DeviceExt;

use crate::bounds::Aabb;
use crate::builder::VolumeBuilder;
use crate::context::GpuContext;
use crate::error::Error;
use crate::manager::{ManagerConfig, VolumeManager};
use crate::mesh::{MeshUploader, TriangleMesh};
use crate::points::{PointCloud, PointConverter};
use crate::reduce::BoundsReducer;

fn context() -> Option<GpuContext> {
    let _ = env_logger::builder().is_test(true).try_init();
    let ctx = GpuContext::try_new();
    if ctx.is_none() {
        eprintln!("no GPU adapter available, skipping");
    }
    ctx
}

/// xorshift64*, seeded per test so point sets are reproducible.
struct TestRng(u64);

impl TestRng {
    fn new(seed: u64) -> Self {
        Self(seed.max(1))
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    /// Uniform in [lo, hi).
    fn next_f32(&mut self, lo: f32, hi: f32) -> f32 {
        let unit = (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32;
        lo + unit * (hi - lo)
    }
}

fn random_points(rng: &mut TestRng, count: usize, lo: f32, hi: f32) -> Vec<[f32; 4]> {
    (0..count)
        .map(|_| {
            [
                rng.next_f32(lo, hi),
                rng.next_f32(lo, hi),
                rng.next_f32(lo, hi),
                1.0,
            ]
        })
        .collect()
}

fn upload_points(ctx: &GpuContext, points: &[[f32; 4]]) -> wgpu::Buffer {
    ctx.device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Test Point Buffer"),
            contents: bytemuck::cast_slice(points),
            usage: wgpu::BufferUsages::STORAGE,
        })
}

fn host_aabb(points: &[[f32; 4]]) -> Aabb {
    let positions: Vec<Vector3<f32>> = points
        .iter()
        .map(|p| Vector3::new(p[0], p[1], p[2]))
        .collect();
    Aabb::from_points(&positions).expect("non-empty point set")
}

fn unit_workspace() -> Aabb {
    Aabb::from_corner_size(Vector3::new(-0.5, -0.5, -0.5), Vector3::new(1.0, 1.0, 1.0))
}

/// Flat quad at y = 0 spanning the unit workspace, tessellated into an
/// `n x n` grid so triangle centroids blanket the plane.
fn tessellated_plane(n: u32) -> TriangleMesh {
    let mut mesh = TriangleMesh::default();
    let step = 1.0 / n as f32;
    for k in 0..=n {
        for i in 0..=n {
            mesh.positions
                .push([-0.5 + i as f32 * step, 0.0, -0.5 + k as f32 * step]);
        }
    }
    let at = |i: u32, k: u32| k * (n + 1) + i;
    for k in 0..n {
        for i in 0..n {
            mesh.indices.push([at(i, k), at(i + 1, k), at(i + 1, k + 1)]);
            mesh.indices.push([at(i, k), at(i + 1, k + 1), at(i, k + 1)]);
        }
    }
    mesh
}

/// Cell value at `(i, j, k)` in the x-fastest layout the kernels write.
fn cell(values: &[f32], resolution: u32, i: u32, j: u32, k: u32) -> f32 {
    values[(i + resolution * (j + resolution * k)) as usize]
}

#[test]
fn reduction_matches_host_reference() {
    let Some(ctx) = context() else { return };
    let mut reducer = BoundsReducer::new(&ctx);

    // Counts straddling the 256-item group size, plus a multi-round one.
    for (seed, count) in [(11u64, 1usize), (12, 255), (13, 256), (14, 257), (15, 100_000)] {
        let points = random_points(&mut TestRng::new(seed), count, -1.0, 2.0);
        let buffer = upload_points(&ctx, &points);
        let gpu = reducer
            .compute_aabb(&ctx, &buffer, count as u32)
            .expect("reduction");
        let host = host_aabb(&points);
        // min/max of uploaded values is exact; no tolerance needed.
        for axis in 0..3 {
            assert_eq!(gpu.min[axis], host.min[axis], "min axis {axis}, count {count}");
            assert_eq!(gpu.max[axis], host.max[axis], "max axis {axis}, count {count}");
        }
    }
}

#[test]
fn conversion_applies_world_to_workspace() {
    let Some(ctx) = context() else { return };
    let mut converter = PointConverter::new(&ctx);
    let mut reducer = BoundsReducer::new(&ctx);

    let points = random_points(&mut TestRng::new(21), 1000, -0.4, 0.4);
    let buffer = upload_points(&ctx, &points);
    let world_to_workspace = Matrix4::from_translation(Vector3::new(0.5, -0.25, 1.0));

    let cloud = PointCloud {
        buffer: &buffer,
        count: points.len() as u32,
    };
    let workspace_points = converter
        .convert(&ctx, cloud, &world_to_workspace)
        .expect("conversion");
    let gpu = reducer
        .compute_aabb(&ctx, workspace_points, cloud.count)
        .expect("reduction");

    let host = host_aabb(&points);
    for axis in 0..3 {
        let offset = [0.5, -0.25, 1.0][axis];
        assert!((gpu.min[axis] - (host.min[axis] + offset)).abs() < 1e-6);
        assert!((gpu.max[axis] - (host.max[axis] + offset)).abs() < 1e-6);
    }
}

#[test]
fn zero_triangle_build_saturates_at_mu() {
    let Some(ctx) = context() else { return };
    let mu = 0.05;
    let mut builder = VolumeBuilder::new(&ctx, 16, mu, unit_workspace()).expect("builder");
    let mut uploader = MeshUploader::new();
    uploader
        .upload(&ctx, &TriangleMesh::default(), &Matrix4::identity())
        .expect("upload");

    builder
        .build(&ctx, uploader.triangles().unwrap(), mu, unit_workspace())
        .expect("build");
    let values = builder.read_distances(&ctx).expect("readback");
    assert_eq!(values.len(), 16 * 16 * 16);
    for v in values {
        assert!((v - mu).abs() < 1e-6, "unseeded cell must saturate, got {v}");
    }
}

#[test]
fn triangles_outside_the_box_leave_it_saturated() {
    let Some(ctx) = context() else { return };
    let mu = 0.05;
    let mut builder = VolumeBuilder::new(&ctx, 8, mu, unit_workspace()).expect("builder");
    let mut uploader = MeshUploader::new();
    // One triangle well outside the workspace; its centroid must not seed.
    let mesh = TriangleMesh {
        positions: vec![[3.0, 3.0, 3.0], [4.0, 3.0, 3.0], [3.0, 4.0, 3.0]],
        indices: vec![[0, 1, 2]],
    };
    uploader
        .upload(&ctx, &mesh, &Matrix4::identity())
        .expect("upload");

    builder
        .build(&ctx, uploader.triangles().unwrap(), mu, unit_workspace())
        .expect("build");
    for v in builder.read_distances(&ctx).expect("readback") {
        assert!((v - mu).abs() < 1e-6);
    }
}

#[test]
fn flat_quad_scenario_builds_both_volumes() {
    let Some(ctx) = context() else { return };
    let config = ManagerConfig {
        global_resolution: 32,
        local_resolution: 32,
        global_mu: 0.08,
        local_mu: 0.05,
        ..ManagerConfig::default()
    };
    let mut manager = VolumeManager::new(&ctx, unit_workspace(), config).expect("manager");
    // 32x32 tessellation: centroid spacing ~0.031, well under a global
    // voxel diagonal, so near-plane cells always see a nearby seed.
    manager
        .initialize(&ctx, &tessellated_plane(32), &Matrix4::identity())
        .expect("initialize");

    let points: Vec<[f32; 4]> = vec![
        [0.0, 0.0, 0.0, 1.0],
        [0.3, 0.0, 0.3, 1.0],
        [-0.3, 0.0, 0.3, 1.0],
        [0.3, 0.0, -0.3, 1.0],
        [-0.3, 0.0, -0.3, 1.0],
    ];
    let buffer = upload_points(&ctx, &points);
    let cloud = PointCloud {
        buffer: &buffer,
        count: points.len() as u32,
    };
    manager
        .update(&ctx, Some(cloud), &Matrix4::identity())
        .expect("update");
    assert_eq!(manager.global_build_count(), 1);
    assert_eq!(manager.local_build_count(), 1);

    // Global volume: the j = 15 cell layer sits ~0.016 under the plane;
    // every cell there must be within a voxel diagonal (~0.054) of it.
    let global = manager.global_volume().expect("global built");
    assert_eq!(global.desc.bounds(), unit_workspace());
    let values = manager.global_builder().read_distances(&ctx).expect("readback");
    for k in 0..32 {
        for i in 0..32 {
            let near = cell(&values, 32, i, 15, k);
            assert!(near < 0.06, "cell ({i}, 15, {k}) far from plane: {near}");
            for j in [0, 31] {
                let far = cell(&values, 32, i, j, k);
                assert!(
                    (far - config.global_mu).abs() < 1e-6,
                    "cell ({i}, {j}, {k}) should saturate: {far}"
                );
            }
        }
    }
    for &v in &values {
        assert!((0.0..=config.global_mu + 1e-6).contains(&v));
    }

    // Local volume covers the margined point-cloud box and hugs the plane.
    let local = manager.local_volume().expect("local built");
    let bounds = local.desc.bounds();
    assert!((bounds.min.y - -0.05).abs() < 1e-5);
    assert!((bounds.max.y - 0.05).abs() < 1e-5);
    assert!((bounds.min.x - -0.35).abs() < 1e-5);
    let local_values = manager.local_builder().read_distances(&ctx).expect("readback");
    for j in [15, 16] {
        let near = cell(&local_values, 32, 16, j, 16);
        assert!(near < 0.03, "local near-plane cell too far: {near}");
    }
    for &v in &local_values {
        assert!((0.0..=config.local_mu + 1e-6).contains(&v));
    }
}

#[test]
fn local_rebuild_honors_hysteresis_end_to_end() {
    let Some(ctx) = context() else { return };
    let mut manager =
        VolumeManager::new(&ctx, unit_workspace(), ManagerConfig::default()).expect("manager");
    manager
        .initialize(&ctx, &tessellated_plane(8), &Matrix4::identity())
        .expect("initialize");

    let frame = |offset: f32| -> Vec<[f32; 4]> {
        vec![
            [offset - 0.1, 0.0, -0.1, 1.0],
            [offset + 0.1, 0.0, 0.1, 1.0],
        ]
    };

    let first = upload_points(&ctx, &frame(0.0));
    manager
        .update(&ctx, Some(PointCloud { buffer: &first, count: 2 }), &Matrix4::identity())
        .expect("update");
    assert_eq!(manager.local_build_count(), 1);

    // Millimeter jitter stays under both hysteresis fractions.
    let jittered = upload_points(&ctx, &frame(0.002));
    manager
        .update(&ctx, Some(PointCloud { buffer: &jittered, count: 2 }), &Matrix4::identity())
        .expect("update");
    assert_eq!(manager.local_build_count(), 1);

    // A frame with no depth leaves the local volume stale, not cleared.
    manager
        .update(&ctx, None, &Matrix4::identity())
        .expect("update");
    assert_eq!(manager.local_build_count(), 1);
    assert!(manager.local_volume().is_some());

    // A real move past the center threshold rebuilds.
    let moved = upload_points(&ctx, &frame(0.2));
    manager
        .update(&ctx, Some(PointCloud { buffer: &moved, count: 2 }), &Matrix4::identity())
        .expect("update");
    assert_eq!(manager.local_build_count(), 2);

    // The global volume was built once on the first update and never again.
    assert_eq!(manager.global_build_count(), 1);
}

#[test]
fn update_before_initialize_is_an_error() {
    let Some(ctx) = context() else { return };
    let mut manager =
        VolumeManager::new(&ctx, unit_workspace(), ManagerConfig::default()).expect("manager");
    let result = manager.update(&ctx, None, &Matrix4::identity());
    assert!(matches!(result, Err(Error::NotInitialized)));
}
