//! Perspective camera
//!
//! A camera is a position plus an orientation. The view matrix is the inverse of
//! that rigid transform; the projection already targets Vulkan clip space
//! (Y down, depth in `[0, 1]`), so no separate correction matrix is needed.

use crate::foundation::math::{perspective_vulkan, Mat4, Quat, Vec3};

/// Perspective camera in world space
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    /// Camera position in world space
    pub position: Vec3,
    /// Orientation; identity looks down -Z with +Y up
    pub rotation: Quat,
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Width over height
    pub aspect: f32,
    /// Near clip distance
    pub near: f32,
    /// Far clip distance
    pub far: f32,
}

impl Camera {
    /// Perspective camera with the field of view given in degrees
    pub fn perspective(position: Vec3, fov_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Self {
            position,
            rotation: Quat::identity(),
            fov_y: fov_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    /// Move the camera
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Replace the orientation
    pub fn set_rotation(&mut self, rotation: Quat) {
        self.rotation = rotation;
    }

    /// Turn to face `target` with `up` as the approximate up direction
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        let forward = target - self.position;
        if forward.norm_squared() > f32::EPSILON {
            // face_towards aligns +Z with the direction; the camera looks down -Z
            self.rotation = Quat::face_towards(&-forward, &up);
        }
    }

    /// Recompute the aspect ratio after the framebuffer changed size.
    ///
    /// A zero height (minimised window) leaves the aspect untouched.
    pub fn update_aspect_ratio(&mut self, width: u32, height: u32) {
        if height == 0 {
            return;
        }
        let aspect = width as f32 / height as f32;
        if (self.aspect - aspect).abs() > 0.01 {
            log::debug!("Camera aspect ratio {:.3} -> {:.3}", self.aspect, aspect);
        }
        self.aspect = aspect;
    }

    /// World-to-view transform
    pub fn view_matrix(&self) -> Mat4 {
        self.rotation.inverse().to_homogeneous() * Mat4::new_translation(&-self.position)
    }

    /// View-to-clip transform
    pub fn projection_matrix(&self) -> Mat4 {
        perspective_vulkan(self.fov_y, self.aspect, self.near, self.far)
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::perspective(Vec3::new(0.0, 0.0, 5.0), 60.0, 4.0 / 3.0, 0.1, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;
    use approx::assert_relative_eq;

    #[test]
    fn test_view_moves_camera_to_origin() {
        let camera = Camera::perspective(Vec3::new(1.0, 2.0, 3.0), 60.0, 1.0, 0.1, 100.0);
        let eye = camera.view_matrix() * Vec4::new(1.0, 2.0, 3.0, 1.0);
        assert_relative_eq!(eye, Vec4::new(0.0, 0.0, 0.0, 1.0), epsilon = 1e-5);
    }

    #[test]
    fn test_view_undoes_rotation() {
        let mut camera = Camera::default();
        camera.set_position(Vec3::zeros());
        camera.set_rotation(Quat::from_axis_angle(&Vec3::y_axis(), std::f32::consts::FRAC_PI_2));

        // a point on the camera's rotated forward axis lands on -Z in view space
        let forward = camera.rotation * Vec3::new(0.0, 0.0, -1.0);
        let eye = camera.view_matrix() * forward.push(1.0);
        assert_relative_eq!(eye, Vec4::new(0.0, 0.0, -1.0, 1.0), epsilon = 1e-5);
    }

    #[test]
    fn test_look_at_faces_target() {
        let mut camera = Camera::perspective(Vec3::new(0.0, 0.0, 10.0), 60.0, 1.0, 0.1, 100.0);
        camera.look_at(Vec3::new(10.0, 0.0, 10.0), Vec3::y());
        let target = camera.view_matrix() * Vec4::new(10.0, 0.0, 10.0, 1.0);
        assert_relative_eq!(target.x, 0.0, epsilon = 1e-4);
        assert_relative_eq!(target.y, 0.0, epsilon = 1e-4);
        assert!(target.z < 0.0);
    }

    #[test]
    fn test_update_aspect_ratio_after_resize() {
        let mut camera = Camera::default();
        camera.update_aspect_ratio(800, 600);
        assert_relative_eq!(camera.aspect, 800.0 / 600.0);
        camera.update_aspect_ratio(1920, 0);
        assert_relative_eq!(camera.aspect, 800.0 / 600.0);
    }

    #[test]
    fn test_projection_flips_y() {
        let camera = Camera::default();
        let projection = camera.projection_matrix();
        assert!(projection[(1, 1)] < 0.0);
    }
}
