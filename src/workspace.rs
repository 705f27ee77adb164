use cgmath::{Matrix4, Quaternion, SquareMatrix, Vector3};

use crate::bounds::Aabb;

/// Rigid placement of the workspace frame in world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WorkspacePose {
    pub position: Vector3<f32>,
    pub orientation: Quaternion<f32>,
}

/// The workspace-local reference frame and its axis-aligned extent.
///
/// Every "corner"/"size" elsewhere in this crate is expressed in this
/// frame's local space unless documented as world space. The frame is set
/// by the placement collaborator and read-only to the engine; `set_pose`
/// recomputes the cached matrices when the placement changes.
///
/// Without a pose, both matrices are identity: world space is treated as
/// workspace space. That silently changes the numerical meaning of every
/// downstream coordinate, so callers are expected to check [`has_pose`]
/// before trusting absolute positions.
///
/// [`has_pose`]: WorkspaceFrame::has_pose
pub struct WorkspaceFrame {
    size: Vector3<f32>,
    pose: Option<WorkspacePose>,
    world_to_workspace: Matrix4<f32>,
    workspace_to_world: Matrix4<f32>,
}

impl WorkspaceFrame {
    pub fn new(pose: Option<WorkspacePose>, size: Vector3<f32>) -> Self {
        if pose.is_none() {
            log::warn!("workspace frame has no pose; treating world space as workspace space");
        }
        let mut frame = Self {
            size,
            pose,
            world_to_workspace: Matrix4::identity(),
            workspace_to_world: Matrix4::identity(),
        };
        frame.recompute();
        frame
    }

    pub fn identity(size: Vector3<f32>) -> Self {
        Self::new(None, size)
    }

    fn recompute(&mut self) {
        match self.pose {
            Some(pose) => {
                self.workspace_to_world =
                    Matrix4::from_translation(pose.position) * Matrix4::from(pose.orientation);
                // Rigid transform: invert the factors rather than the matrix.
                self.world_to_workspace = Matrix4::from(pose.orientation.conjugate())
                    * Matrix4::from_translation(-pose.position);
            }
            None => {
                self.workspace_to_world = Matrix4::identity();
                self.world_to_workspace = Matrix4::identity();
            }
        }
    }

    pub fn set_pose(&mut self, pose: Option<WorkspacePose>) {
        self.pose = pose;
        self.recompute();
    }

    pub fn has_pose(&self) -> bool {
        self.pose.is_some()
    }

    pub fn world_to_workspace(&self) -> Matrix4<f32> {
        self.world_to_workspace
    }

    pub fn workspace_to_world(&self) -> Matrix4<f32> {
        self.workspace_to_world
    }

    pub fn size(&self) -> Vector3<f32> {
        self.size
    }

    /// Workspace-space corner of the workspace box: the frame origin sits
    /// at the box center.
    pub fn corner(&self) -> Vector3<f32> {
        -self.size * 0.5
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_corner_size(self.corner(), self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{InnerSpace, Rad, Rotation3, Transform, Point3};

    fn sample_pose() -> WorkspacePose {
        WorkspacePose {
            position: Vector3::new(1.0, -2.0, 0.5),
            orientation: Quaternion::from_axis_angle(
                Vector3::new(0.0, 1.0, 0.0).normalize(),
                Rad(0.7),
            ),
        }
    }

    #[test]
    fn matrices_are_mutual_inverses() {
        let frame = WorkspaceFrame::new(Some(sample_pose()), Vector3::new(1.0, 1.0, 1.0));
        let p = Point3::new(0.3, -0.1, 0.8);
        let roundtrip = frame
            .world_to_workspace()
            .transform_point(frame.workspace_to_world().transform_point(p));
        assert!((roundtrip.x - p.x).abs() < 1e-5);
        assert!((roundtrip.y - p.y).abs() < 1e-5);
        assert!((roundtrip.z - p.z).abs() < 1e-5);
    }

    #[test]
    fn missing_pose_degrades_to_identity() {
        let frame = WorkspaceFrame::identity(Vector3::new(2.0, 2.0, 2.0));
        assert!(!frame.has_pose());
        assert_eq!(frame.world_to_workspace(), Matrix4::identity());
        assert_eq!(frame.workspace_to_world(), Matrix4::identity());
    }

    #[test]
    fn bounds_center_on_origin() {
        let frame = WorkspaceFrame::identity(Vector3::new(1.0, 2.0, 3.0));
        let bounds = frame.bounds();
        assert_eq!(bounds.corner(), Vector3::new(-0.5, -1.0, -1.5));
        assert_eq!(bounds.size(), Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn set_pose_recomputes_matrices() {
        let mut frame = WorkspaceFrame::identity(Vector3::new(1.0, 1.0, 1.0));
        frame.set_pose(Some(sample_pose()));
        assert!(frame.has_pose());
        assert_ne!(frame.world_to_workspace(), Matrix4::identity());
        frame.set_pose(None);
        assert_eq!(frame.world_to_workspace(), Matrix4::identity());
    }
}
