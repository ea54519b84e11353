//! Sphere tests against the view frustum and its screen-space projection

use crate::foundation::math::{normalize_plane, Mat4, Vec3};

/// Side-plane coefficients used by the culling shaders
///
/// The left/right and top/bottom planes are symmetric, so only
/// `[x.x, x.z, y.y, y.z]` of the normalised `row3 + row0` and `row3 + row1`
/// are needed.
pub fn culling_frustum(projection: &Mat4) -> [f32; 4] {
    let projection_t = projection.transpose();
    let x = normalize_plane(projection_t.column(3) + projection_t.column(0));
    let y = normalize_plane(projection_t.column(3) + projection_t.column(1));
    [x.x, x.z, y.y, y.z]
}

/// Whether a view-space sphere intersects the frustum
pub fn sphere_in_frustum(center: Vec3, radius: f32, frustum: [f32; 4], z_near: f32) -> bool {
    center.z * frustum[1] - center.x.abs() * frustum[0] > -radius
        && center.z * frustum[3] - center.y.abs() * frustum[2] > -radius
        && center.z + radius > z_near
}

/// Screen-space bounds of a view-space sphere as `[min_u, min_v, max_u, max_v]`
///
/// Uses the tangent-line construction of Mara and McGuire, "2D Polyhedral
/// Bounds of a Clipped, Perspective-Projected 3D Sphere". Returns `None` when
/// the sphere touches the near plane, in which case it must be treated as
/// visible.
///
/// `min_v < max_v` always holds. The late-cull shader picks its pyramid level
/// from `max_v - min_v` and relies on the same order from `projectSphere`.
pub fn project_sphere(center: Vec3, radius: f32, z_near: f32, p00: f32, p11: f32) -> Option<[f32; 4]> {
    if center.z < radius + z_near {
        return None;
    }

    let cr = center * radius;
    let czr2 = center.z * center.z - radius * radius;

    let vx = (center.x * center.x + czr2).sqrt();
    let min_x = (vx * center.x - cr.z) / (vx * center.z + cr.x);
    let max_x = (vx * center.x + cr.z) / (vx * center.z - cr.x);

    let vy = (center.y * center.y + czr2).sqrt();
    let min_y = (vy * center.y - cr.z) / (vy * center.z + cr.y);
    let max_y = (vy * center.y + cr.z) / (vy * center.z - cr.y);

    // Clip space to UV; clip +Y is the top of the framebuffer
    Some([
        min_x * p00 * 0.5 + 0.5,
        max_y * p11 * -0.5 + 0.5,
        max_x * p00 * 0.5 + 0.5,
        min_y * p11 * -0.5 + 0.5,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{deg_to_rad, perspective_infinite_reverse_z};
    use approx::assert_relative_eq;

    fn frustum_90() -> [f32; 4] {
        culling_frustum(&perspective_infinite_reverse_z(deg_to_rad(90.0), 1.0, 0.1))
    }

    #[test]
    fn test_frustum_planes_for_square_90_degrees() {
        let f = frustum_90();
        let s = std::f32::consts::FRAC_1_SQRT_2;
        assert_relative_eq!(f[0], s, epsilon = 1e-6);
        assert_relative_eq!(f[1], s, epsilon = 1e-6);
        assert_relative_eq!(f[2], s, epsilon = 1e-6);
        assert_relative_eq!(f[3], s, epsilon = 1e-6);
    }

    #[test]
    fn test_sphere_in_front_is_inside() {
        assert!(sphere_in_frustum(Vec3::new(0.0, 0.0, 5.0), 1.0, frustum_90(), 0.1));
    }

    #[test]
    fn test_sphere_behind_camera_is_outside() {
        assert!(!sphere_in_frustum(Vec3::new(0.0, 0.0, -5.0), 1.0, frustum_90(), 0.1));
    }

    #[test]
    fn test_sphere_beside_frustum_is_outside() {
        // 90 degree FOV: |x| > z is outside, the sphere sits well past that
        assert!(!sphere_in_frustum(Vec3::new(10.0, 0.0, 5.0), 1.0, frustum_90(), 0.1));
        assert!(!sphere_in_frustum(Vec3::new(0.0, -10.0, 5.0), 1.0, frustum_90(), 0.1));
    }

    #[test]
    fn test_sphere_straddling_plane_is_inside() {
        assert!(sphere_in_frustum(Vec3::new(5.5, 0.0, 5.0), 1.0, frustum_90(), 0.1));
    }

    #[test]
    fn test_projected_sphere_is_centred() {
        let aabb = project_sphere(Vec3::new(0.0, 0.0, 10.0), 1.0, 0.1, 1.0, 1.0).unwrap();
        assert_relative_eq!((aabb[0] + aabb[2]) * 0.5, 0.5, epsilon = 1e-6);
        assert_relative_eq!((aabb[1] + aabb[3]) * 0.5, 0.5, epsilon = 1e-6);
        assert!(aabb[0] < aabb[2]);
        assert!(aabb[1] < aabb[3]);
        // tan(asin(0.1)) ~ 0.1005 in clip space, half that in UV
        assert_relative_eq!(aabb[2] - aabb[0], 0.1005, epsilon = 1e-3);
    }

    #[test]
    fn test_sphere_above_centre_projects_to_top() {
        let aabb = project_sphere(Vec3::new(0.0, 3.0, 10.0), 1.0, 0.1, 1.0, 1.0).unwrap();
        assert!(aabb[3] < 0.5);
    }

    #[test]
    fn test_off_axis_sphere_bounds_are_ordered_for_wide_aspect() {
        let projection = perspective_infinite_reverse_z(deg_to_rad(60.0), 16.0 / 9.0, 0.1);
        let (p00, p11) = (projection[(0, 0)], projection[(1, 1)]);

        for center in [Vec3::new(0.0, 0.0, 10.0), Vec3::new(2.0, -1.5, 10.0), Vec3::new(-3.0, 2.5, 12.0)] {
            let rect = project_sphere(center, 1.0, 0.1, p00, p11).unwrap();
            assert!(rect[0] < rect[2], "u bounds out of order: {:?}", rect);
            assert!(rect[1] < rect[3], "v bounds out of order: {:?}", rect);

            // Taller than wide on a 1024x1024 pyramid, so height drives the level
            let width = (rect[2] - rect[0]) * 1024.0;
            let height = (rect[3] - rect[1]) * 1024.0;
            assert!(height > width);
            let level = width.max(height).log2().floor();
            assert!(height / 2f32.powf(level) <= 2.0);
        }
    }

    #[test]
    fn test_shader_projection_uses_same_bound_order() {
        let source = include_str!("../../../../../resources/shaders/cull_common.glsl");
        assert!(source.contains("aabb = vec4(minx * cull.p00, miny * cull.p11, maxx * cull.p00, maxy * cull.p11);"));
        assert!(source.contains("aabb = aabb.xwzy * vec4(0.5, -0.5, 0.5, -0.5) + vec4(0.5);"));
    }

    #[test]
    fn test_sphere_crossing_near_plane_is_not_projected() {
        assert!(project_sphere(Vec3::new(0.0, 0.0, 0.5), 1.0, 0.1, 1.0, 1.0).is_none());
    }
}
