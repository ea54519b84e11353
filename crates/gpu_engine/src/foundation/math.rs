//! Math utilities and types
//!
//! Thin nalgebra aliases plus the camera conventions the culling shaders rely on.
//!
//! View space is left-handed with +X right, +Y up and +Z pointing into the screen.
//! Projections are infinite and reverse-Z: the near plane maps to depth 1.0 and
//! depth approaches 0.0 at infinity. The renderer flips the viewport height so
//! clip-space +Y ends up at the top of the framebuffer.

pub use nalgebra::{
    Vector2, Vector3, Vector4,
    Matrix3, Matrix4,
    Quaternion,
    Unit,
};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Math constants
pub mod constants {
    /// Pi constant
    pub const PI: f32 = std::f32::consts::PI;

    /// Degrees to radians conversion factor
    pub const DEG_TO_RAD: f32 = PI / 180.0;
}

/// Convert degrees to radians
pub fn deg_to_rad(degrees: f32) -> f32 {
    degrees * constants::DEG_TO_RAD
}

/// Largest power of two strictly below `v`, and 1 for `v <= 2`.
///
/// Used for the depth pyramid base so that a pyramid texel never covers less
/// than a 2x2 block of the source depth buffer.
pub fn previous_pow2(v: u32) -> u32 {
    let mut r = 1u32;
    while r.saturating_mul(2) < v {
        r *= 2;
    }
    r
}

/// Infinite reverse-Z perspective projection for a +Z-forward view space
///
/// `fov_y` is in radians. Clip `z` is the constant `z_near` and clip `w` is
/// view-space depth, so NDC depth is `z_near / z_view`.
pub fn perspective_infinite_reverse_z(fov_y: f32, aspect: f32, z_near: f32) -> Mat4 {
    let f = 1.0 / (fov_y * 0.5).tan();
    Mat4::new(
        f / aspect, 0.0, 0.0, 0.0,
        0.0, f, 0.0, 0.0,
        0.0, 0.0, 0.0, z_near,
        0.0, 0.0, 1.0, 0.0,
    )
}

/// View matrix looking from `eye` towards `target`, +Z forward
pub fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
    let forward = (target - eye).normalize();
    let right = up.cross(&forward).normalize();
    let camera_up = forward.cross(&right);

    Mat4::new(
        right.x, right.y, right.z, -right.dot(&eye),
        camera_up.x, camera_up.y, camera_up.z, -camera_up.dot(&eye),
        forward.x, forward.y, forward.z, -forward.dot(&eye),
        0.0, 0.0, 0.0, 1.0,
    )
}

/// Normalize a plane equation by the length of its normal
pub fn normalize_plane(plane: Vec4) -> Vec4 {
    let len = plane.xyz().norm();
    if len > 0.0 {
        plane / len
    } else {
        plane
    }
}

/// Rotate `v` by a unit quaternion stored as `[x, y, z, w]`
pub fn rotate_by_quat(orientation: [f32; 4], v: Vec3) -> Vec3 {
    let q = Quat::from_quaternion(Quaternion::new(
        orientation[3],
        orientation[0],
        orientation[1],
        orientation[2],
    ));
    q * v
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_previous_pow2() {
        assert_eq!(previous_pow2(1920), 1024);
        assert_eq!(previous_pow2(1080), 1024);
        assert_eq!(previous_pow2(1024), 512);
        assert_eq!(previous_pow2(1025), 1024);
        assert_eq!(previous_pow2(3), 2);
        assert_eq!(previous_pow2(2), 1);
        assert_eq!(previous_pow2(1), 1);
        assert_eq!(previous_pow2(0), 1);
    }

    #[test]
    fn test_reverse_z_depth_range() {
        let proj = perspective_infinite_reverse_z(deg_to_rad(45.0), 16.0 / 9.0, 0.1);

        let near = proj * Vec4::new(0.0, 0.0, 0.1, 1.0);
        assert_relative_eq!(near.z / near.w, 1.0);

        let far = proj * Vec4::new(0.0, 0.0, 1000.0, 1.0);
        assert!(far.z / far.w < 1e-3);
        assert!(far.z / far.w > 0.0);
    }

    #[test]
    fn test_look_at_puts_target_on_positive_z() {
        let view = look_at(Vec3::new(0.0, 0.0, -5.0), Vec3::zeros(), Vec3::y());
        let target = view * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(target.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(target.y, 0.0, epsilon = 1e-6);
        assert_relative_eq!(target.z, 5.0, epsilon = 1e-6);

        let right = view * Vec4::new(1.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(right.x, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_identity_quat_rotation() {
        let v = Vec3::new(1.0, 2.0, 3.0);
        assert_relative_eq!(rotate_by_quat([0.0, 0.0, 0.0, 1.0], v), v);
    }
}
