//! Perspective camera.

use crate::scene::CameraView;
use engine_core::Transform;
use glam::{Mat4, Vec3};

/// Perspective camera with configurable FOV and clipping planes.
#[derive(Debug, Clone)]
pub struct Camera {
    /// Camera transform (position and rotation).
    pub transform: Transform,
    /// Vertical field of view in degrees.
    pub fov_degrees: f32,
    /// Near clipping plane.
    pub near: f32,
    /// Far clipping plane.
    pub far: f32,
    /// Aspect ratio (width / height).
    pub aspect: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            transform: Transform::default(),
            fov_degrees: 60.0,
            near: 0.1,
            far: 1000.0,
            aspect: 16.0 / 9.0,
        }
    }
}

impl Camera {
    /// Create a new camera at the given position.
    pub fn new(position: Vec3) -> Self {
        Self {
            transform: Transform::from_position(position),
            ..Default::default()
        }
    }

    /// Camera at `eye` looking at `target`.
    pub fn looking_at(eye: Vec3, target: Vec3) -> Self {
        let mut camera = Self::new(eye);
        let dir = (target - eye).normalize_or_zero();
        let yaw = (-dir.x).atan2(-dir.z);
        let pitch = dir.y.clamp(-1.0, 1.0).asin();
        camera.set_yaw_pitch(yaw, pitch);
        camera
    }

    /// Update aspect ratio (call on window resize).
    pub fn set_aspect(&mut self, width: u32, height: u32) {
        self.aspect = width as f32 / height.max(1) as f32;
    }

    /// Get the view matrix.
    pub fn view_matrix(&self) -> Mat4 {
        let eye = self.transform.position;
        let target = eye + self.transform.forward();
        Mat4::look_at_rh(eye, target, Vec3::Y)
    }

    /// Get the projection matrix.
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_degrees.to_radians(), self.aspect, self.near, self.far)
    }

    /// Get the combined view-projection matrix.
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// Get camera position.
    pub fn position(&self) -> Vec3 {
        self.transform.position
    }

    /// Get camera forward direction.
    pub fn forward(&self) -> Vec3 {
        self.transform.forward()
    }

    /// Set yaw and pitch directly (in radians) and rebuild rotation.
    pub fn set_yaw_pitch(&mut self, yaw: f32, pitch: f32) {
        // Clamp pitch to prevent flipping
        let max_pitch = std::f32::consts::FRAC_PI_2 - 0.01;
        let pitch = pitch.clamp(-max_pitch, max_pitch);
        self.transform.rotation = glam::Quat::from_rotation_y(yaw) * glam::Quat::from_rotation_x(pitch);
    }
}

impl CameraView for Camera {
    fn view_matrix(&self) -> Mat4 {
        Camera::view_matrix(self)
    }

    fn projection_matrix(&self) -> Mat4 {
        Camera::projection_matrix(self)
    }

    fn position(&self) -> Vec3 {
        self.transform.position
    }
}

/// Per-frame camera matrices shared by every pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraMatrices {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
    pub inverse_view_projection: Mat4,
    /// Last frame's view-projection; `None` on the first frame and after a resize.
    pub previous_view_projection: Option<Mat4>,
    pub position: Vec3,
}

impl CameraMatrices {
    pub fn from_view(camera: &dyn CameraView, previous_view_projection: Option<Mat4>) -> Self {
        let view = camera.view_matrix();
        let projection = camera.projection_matrix();
        let view_projection = projection * view;
        Self {
            view,
            projection,
            view_projection,
            inverse_view_projection: view_projection.inverse(),
            previous_view_projection,
            position: camera.position(),
        }
    }

    /// Normalized screen coordinate of a world point (y down), or `None` behind the camera.
    pub fn project(&self, world: Vec3) -> Option<glam::Vec2> {
        project_with(&self.view_projection, world)
    }
}

/// Project with an arbitrary view-projection into [0, 1] screen space, y down.
pub fn project_with(view_projection: &Mat4, world: Vec3) -> Option<glam::Vec2> {
    let clip = *view_projection * world.extend(1.0);
    if clip.w <= f32::EPSILON {
        return None;
    }
    let ndc = clip.truncate() / clip.w;
    Some(glam::Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looking_at_faces_target() {
        let camera = Camera::looking_at(Vec3::new(0.0, 3.0, 5.0), Vec3::ZERO);
        let expected = (Vec3::ZERO - Vec3::new(0.0, 3.0, 5.0)).normalize();
        assert!((camera.forward() - expected).length() < 1e-3);
    }

    #[test]
    fn target_projects_to_screen_center() {
        let camera = Camera::looking_at(Vec3::new(4.0, 2.0, 4.0), Vec3::ZERO);
        let clip = camera.view_projection_matrix() * glam::Vec4::new(0.0, 0.0, 0.0, 1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-3 && ndc.y.abs() < 1e-3);
        assert!(ndc.z > 0.0 && ndc.z < 1.0);
    }
}
