//! GPU-resident truncated distance fields for a moving workspace.
//!
//! Everything downstream of the sensor lives in a gravity-aligned
//! workspace frame: a target mesh is flattened into that frame once,
//! incoming point clouds are converted per frame, and compute kernels
//! voxelize + jump-flood the mesh into a pair of unsigned distance
//! volumes. [`manager::VolumeManager`] ties the kernels together and
//! decides when the tight local volume is worth rebuilding.

pub mod bounds;
pub mod builder;
pub mod context;
pub mod error;
pub mod manager;
pub mod mesh;
pub mod points;
pub mod reduce;
pub mod volume;
pub mod workspace;

#[cfg(test)]
mod gpu_tests;

pub use bounds::Aabb;
pub use builder::VolumeBuilder;
pub use context::GpuContext;
pub use error::{Error, Result};
pub use manager::{ManagerConfig, VolumeManager};
pub use mesh::{MeshUploader, TriangleMesh};
pub use points::{PointCloud, PointConverter};
pub use reduce::BoundsReducer;
pub use volume::{SdfVolumeData, VolumeDesc};
pub use workspace::{WorkspaceFrame, WorkspacePose};
