use cgmath::Matrix4;

use crate::bounds::Aabb;
use crate::builder::VolumeBuilder;
use crate::context::GpuContext;
use crate::error::{Error, Result};
use crate::mesh::{MeshUploader, TriangleMesh};
use crate::points::{PointCloud, PointConverter};
use crate::reduce::BoundsReducer;
use crate::volume::SdfVolumeData;

/// Construction-time configuration for the dual-resolution manager.
///
/// Validated once at [`VolumeManager::new`]; a bad value is a
/// configuration error, never a runtime surprise.
#[derive(Clone, Copy, Debug)]
pub struct ManagerConfig {
    /// Cells per axis of the whole-workspace volume.
    pub global_resolution: u32,
    /// Cells per axis of the adaptive local volume.
    pub local_resolution: u32,
    /// Truncation distance of the global volume, meters.
    pub global_mu: f32,
    /// Truncation distance of the local volume, meters. Also the margin
    /// added around the point-cloud AABB so boundary voxels still see
    /// nearby geometry.
    pub local_mu: f32,
    /// Minimum local box edge length, meters. Stops a tight point
    /// cluster from producing a degenerate thin volume.
    pub min_local_extent: f32,
    /// Rebuild when the candidate box center moves by more than this
    /// fraction of the previous size along any axis.
    pub center_move_fraction: f32,
    /// Rebuild when the candidate box size changes by more than this
    /// fraction of the previous size along any axis.
    pub size_change_fraction: f32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            global_resolution: 64,
            local_resolution: 64,
            global_mu: 0.08,
            local_mu: 0.02,
            min_local_extent: 0.10,
            center_move_fraction: 0.25,
            size_change_fraction: 0.15,
        }
    }
}

impl ManagerConfig {
    fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(Error::InvalidConfig(msg.into()));
        if self.global_resolution == 0 || self.local_resolution == 0 {
            return fail("volume resolutions must be positive");
        }
        if self.global_mu <= 0.0 || self.local_mu <= 0.0 {
            return fail("truncation distances must be positive");
        }
        if self.min_local_extent <= 0.0 {
            return fail("minimum local extent must be positive");
        }
        if !(0.0..=1.0).contains(&self.center_move_fraction)
            || self.center_move_fraction == 0.0
            || !(0.0..=1.0).contains(&self.size_change_fraction)
            || self.size_change_fraction == 0.0
        {
            return fail("hysteresis fractions must be in (0, 1]");
        }
        Ok(())
    }
}

/// Rebuild hysteresis: a local rebuild costs a full flood, so point-cloud
/// jitter below the configured fractions of the previous box must not
/// trigger one.
pub(crate) fn local_rebuild_needed(
    previous: &Aabb,
    candidate: &Aabb,
    center_move_fraction: f32,
    size_change_fraction: f32,
) -> bool {
    let prev_size = previous.size();
    let center_delta = candidate.center() - previous.center();
    let size_delta = candidate.size() - prev_size;
    for axis in 0..3 {
        if center_delta[axis].abs() > center_move_fraction * prev_size[axis] {
            return true;
        }
        if size_delta[axis].abs() > size_change_fraction * prev_size[axis] {
            return true;
        }
    }
    false
}

/// Derive the local volume's box from the point cloud's AABB: margin by
/// `local_mu` on every side, enforce the minimum extent, then clamp into
/// the workspace so the local volume never leaves the region the global
/// one covers.
pub(crate) fn candidate_local_box(
    cloud: &Aabb,
    local_mu: f32,
    min_extent: f32,
    workspace: &Aabb,
) -> Aabb {
    cloud
        .expand(local_mu)
        .with_min_extent(min_extent)
        .clamp_to(workspace)
}

/// Owns the global (whole-workspace, coarse) and local (point-cloud
/// tracking, fine) distance volumes and decides per frame whether either
/// must be rebuilt.
///
/// Single-writer: concurrent `update` calls on one manager are not
/// supported. Once a volume has been built it stays queryable; a rebuild
/// replaces its cell contents wholesale and no partial state is
/// observable through the accessors.
pub struct VolumeManager {
    config: ManagerConfig,
    workspace_bounds: Aabb,
    uploader: MeshUploader,
    converter: PointConverter,
    reducer: BoundsReducer,
    global_builder: VolumeBuilder,
    local_builder: VolumeBuilder,
    global_dirty: bool,
    last_local_box: Option<Aabb>,
    global_builds: u64,
    local_builds: u64,
}

impl VolumeManager {
    /// Construct every kernel family up front; a missing or failing
    /// pipeline is a configuration error here, not at first use.
    pub fn new(ctx: &GpuContext, workspace_bounds: Aabb, config: ManagerConfig) -> Result<Self> {
        config.validate()?;
        if workspace_bounds.is_empty() {
            return Err(Error::InvalidConfig(
                "workspace bounds must have positive extent on every axis".into(),
            ));
        }
        let converter = PointConverter::new(ctx);
        let reducer = BoundsReducer::new(ctx);
        let global_builder = VolumeBuilder::new(
            ctx,
            config.global_resolution,
            config.global_mu,
            workspace_bounds,
        )?;
        // The local box is retargeted before every build; the workspace
        // box only serves as a non-degenerate placeholder.
        let local_builder = VolumeBuilder::new(
            ctx,
            config.local_resolution,
            config.local_mu,
            workspace_bounds,
        )?;
        Ok(Self {
            config,
            workspace_bounds,
            uploader: MeshUploader::new(),
            converter,
            reducer,
            global_builder,
            local_builder,
            global_dirty: true,
            last_local_box: None,
            global_builds: 0,
            local_builds: 0,
        })
    }

    /// Upload (or replace) the target mesh, transformed into workspace
    /// space. Marks the global volume dirty.
    pub fn initialize(
        &mut self,
        ctx: &GpuContext,
        mesh: &TriangleMesh,
        model_to_workspace: &Matrix4<f32>,
    ) -> Result<()> {
        self.uploader.upload(ctx, mesh, model_to_workspace)?;
        self.global_dirty = true;
        Ok(())
    }

    /// Move or resize the workspace box (placement/recalibration).
    pub fn set_workspace_bounds(&mut self, bounds: Aabb) -> Result<()> {
        if bounds.is_empty() {
            return Err(Error::InvalidConfig(
                "workspace bounds must have positive extent on every axis".into(),
            ));
        }
        if bounds != self.workspace_bounds {
            self.workspace_bounds = bounds;
            self.global_dirty = true;
        }
        Ok(())
    }

    /// Per-frame entry point.
    ///
    /// `points` is the sensor's world-space point buffer for this frame,
    /// or `None` when the frame carried no valid depth; in that case only
    /// the global volume is reconsidered and an existing local volume is
    /// left stale rather than cleared. `world_to_workspace` is passed
    /// explicitly each call (frames may be recalibrated between updates).
    pub fn update(
        &mut self,
        ctx: &GpuContext,
        points: Option<PointCloud<'_>>,
        world_to_workspace: &Matrix4<f32>,
    ) -> Result<()> {
        let triangles = self.uploader.triangles().ok_or(Error::NotInitialized)?;

        if self.global_dirty || !self.global_builder.volume().is_valid() {
            self.global_builder.build(
                ctx,
                triangles,
                self.config.global_mu,
                self.workspace_bounds,
            )?;
            self.global_dirty = false;
            self.global_builds += 1;
        }

        let points = match points {
            Some(p) if p.count > 0 => p,
            _ => {
                log::debug!("no depth points this frame; local volume left as-is");
                return Ok(());
            }
        };

        let workspace_points = self
            .converter
            .convert(ctx, points, world_to_workspace)?;
        let cloud = self
            .reducer
            .compute_aabb(ctx, workspace_points, points.count)?;

        let candidate = candidate_local_box(
            &cloud,
            self.config.local_mu,
            self.config.min_local_extent,
            &self.workspace_bounds,
        );
        if candidate.is_empty() {
            log::warn!(
                "point cloud AABB {:?} lies outside the workspace; skipping local rebuild",
                cloud
            );
            return Ok(());
        }

        let rebuild = match &self.last_local_box {
            None => true,
            Some(previous) => local_rebuild_needed(
                previous,
                &candidate,
                self.config.center_move_fraction,
                self.config.size_change_fraction,
            ),
        };
        if rebuild {
            log::debug!(
                "rebuilding local volume over {:?} (previous {:?})",
                candidate,
                self.last_local_box
            );
            self.local_builder
                .build(ctx, triangles, self.config.local_mu, candidate)?;
            self.last_local_box = Some(candidate);
            self.local_builds += 1;
        }
        Ok(())
    }

    /// Whole-workspace volume, `None` until its first build completes.
    pub fn global_volume(&self) -> Option<SdfVolumeData<'_>> {
        let volume = self.global_builder.volume();
        volume.is_valid().then(|| volume.data())
    }

    /// Point-cloud-tracking volume, `None` until its first build.
    pub fn local_volume(&self) -> Option<SdfVolumeData<'_>> {
        let volume = self.local_builder.volume();
        volume.is_valid().then(|| volume.data())
    }

    /// The most recent workspace-space point buffer, for visualization
    /// reuse.
    pub fn workspace_points(&self) -> &wgpu::Buffer {
        self.converter.workspace_points()
    }

    pub fn workspace_bounds(&self) -> Aabb {
        self.workspace_bounds
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Number of global builds issued so far. Backs rebuild-policy tests
    /// and host-side diagnostics.
    pub fn global_build_count(&self) -> u64 {
        self.global_builds
    }

    /// Number of local builds issued so far.
    pub fn local_build_count(&self) -> u64 {
        self.local_builds
    }

    pub(crate) fn global_builder(&self) -> &VolumeBuilder {
        &self.global_builder
    }

    pub(crate) fn local_builder(&self) -> &VolumeBuilder {
        &self.local_builder
    }
}
