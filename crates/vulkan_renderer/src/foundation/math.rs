//! Math types used by the uniform block
//!
//! Vulkan clip space has Y pointing down and depth in `[0, 1]`; the helpers
//! here produce matrices in that convention.

pub use nalgebra::{Matrix4, Point3, Vector3};

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// Right-handed perspective projection with `[0, 1]` depth and a flipped Y axis.
pub fn vulkan_perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let tan_half_fovy = (fov_y * 0.5).tan();

    let mut result = Mat4::zeros();
    result[(0, 0)] = 1.0 / (aspect * tan_half_fovy);
    result[(1, 1)] = -1.0 / tan_half_fovy;
    result[(2, 2)] = far / (near - far);
    result[(2, 3)] = -(far * near) / (far - near);
    result[(3, 2)] = -1.0;
    result
}

/// Right-handed view matrix looking from `eye` towards `target`.
pub fn look_at(eye: &Point3<f32>, target: &Point3<f32>, up: &Vec3) -> Mat4 {
    Mat4::look_at_rh(eye, target, up)
}

/// Aspect ratio of an extent, falling back to 1.0 for a degenerate height.
pub fn aspect_ratio(width: u32, height: u32) -> f32 {
    if height == 0 {
        1.0
    } else {
        width as f32 / height as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector4;

    #[test]
    fn test_perspective_maps_near_and_far_to_unit_depth() {
        let proj = vulkan_perspective(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 10.0);

        let near = proj * Vector4::new(0.0, 0.0, -0.1, 1.0);
        let far = proj * Vector4::new(0.0, 0.0, -10.0, 1.0);

        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_perspective_flips_y() {
        let proj = vulkan_perspective(std::f32::consts::FRAC_PI_2, 1.0, 0.1, 10.0);
        let up = proj * Vector4::new(0.0, 1.0, -1.0, 1.0);
        assert!(up.y / up.w < 0.0);
    }

    #[test]
    fn test_aspect_ratio_handles_zero_height() {
        assert_relative_eq!(aspect_ratio(800, 600), 800.0 / 600.0);
        assert_relative_eq!(aspect_ratio(800, 0), 1.0);
    }
}
