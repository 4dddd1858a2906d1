//! Math types used by the renderer
//!
//! Thin aliases over `nalgebra`. Matrices cross into GPU memory only as
//! column-major `[f32; 16]` arrays produced by [`mat4_to_cols`].

pub use nalgebra::{Matrix4, Quaternion, Unit, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Position, rotation and scale of an object in world space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    /// Position in 3D space
    pub position: Vec3,
    /// Rotation quaternion
    pub rotation: Quat,
    /// Scale factors
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Quat::identity(),
            scale: Vec3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    /// Transform with position and rotation and unit scale
    pub fn from_position_rotation(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            ..Default::default()
        }
    }

    /// Convert to a transformation matrix (translate * rotate * scale)
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::new_translation(&self.position)
            * self.rotation.to_homogeneous()
            * Mat4::new_nonuniform_scaling(&self.scale)
    }
}

/// Column-major copy of a matrix, the layout shaders expect
pub fn mat4_to_cols(matrix: &Mat4) -> [f32; 16] {
    let mut out = [0.0; 16];
    out.copy_from_slice(matrix.as_slice());
    out
}

/// Rotate a 2D vector counter-clockwise by `radians`.
///
/// The second component uses `cos`. An older engine revision used `sin` for both
/// terms, which is not a rotation.
pub fn rotate_vec2(v: Vec2, radians: f32) -> Vec2 {
    let (sin, cos) = radians.sin_cos();
    Vec2::new(v.x * cos - v.y * sin, v.x * sin + v.y * cos)
}

/// Right-handed perspective projection with depth in `[0, 1]` and Y pointing down
/// in clip space, matching Vulkan conventions.
pub fn perspective_vulkan(fov_y_radians: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let f = 1.0 / (fov_y_radians * 0.5).tan();
    let range = far / (near - far);

    #[rustfmt::skip]
    let projection = Mat4::new(
        f / aspect, 0.0, 0.0,   0.0,
        0.0,        -f,  0.0,   0.0,
        0.0,        0.0, range, range * near,
        0.0,        0.0, -1.0,  0.0,
    );
    projection
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const EPSILON: f32 = 1e-5;

    #[test]
    fn test_rotate_vec2_quarter_turn() {
        let rotated = rotate_vec2(Vec2::new(1.0, 0.0), std::f32::consts::FRAC_PI_2);
        assert_relative_eq!(rotated.x, 0.0, epsilon = EPSILON);
        assert_relative_eq!(rotated.y, 1.0, epsilon = EPSILON);
    }

    #[test]
    fn test_rotate_vec2_preserves_length() {
        let v = Vec2::new(3.0, -4.0);
        let rotated = rotate_vec2(v, 1.234);
        assert_relative_eq!(rotated.norm(), 5.0, epsilon = EPSILON);
    }

    #[test]
    fn test_mat4_to_cols_is_column_major() {
        let m = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        let cols = mat4_to_cols(&m);
        // Translation lives in the fourth column
        assert_relative_eq!(cols[12], 1.0);
        assert_relative_eq!(cols[13], 2.0);
        assert_relative_eq!(cols[14], 3.0);
        assert_relative_eq!(cols[15], 1.0);
    }

    #[test]
    fn test_transform_matrix_translates_origin() {
        let transform = Transform::from_position_rotation(
            Vec3::new(5.0, 0.0, -2.0),
            Quat::from_axis_angle(&Vec3::y_axis(), 0.7),
        );
        let origin = transform.to_matrix() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(origin.x, 5.0, epsilon = EPSILON);
        assert_relative_eq!(origin.z, -2.0, epsilon = EPSILON);
    }

    #[test]
    fn test_perspective_depth_range() {
        let near = 0.1;
        let far = 100.0;
        let proj = perspective_vulkan(1.0, 16.0 / 9.0, near, far);

        let at_near = proj * Vec4::new(0.0, 0.0, -near, 1.0);
        let at_far = proj * Vec4::new(0.0, 0.0, -far, 1.0);

        assert_relative_eq!(at_near.z / at_near.w, 0.0, epsilon = EPSILON);
        assert_relative_eq!(at_far.z / at_far.w, 1.0, epsilon = 1e-4);
    }
}
