//! Two-phase GPU culling: shared parameters and a CPU reference
//!
//! The compute shaders `initial_cull.comp` and `late_cull.comp` and the
//! [`CullingModel`] implement the same tests:
//!
//! 1. bounding sphere against the four side planes and the near plane,
//! 2. in the late pass only, the sphere's screen-space rectangle against the
//!    depth pyramid built from the first render pass.
//!
//! Depth is reverse-Z everywhere: larger values are closer to the camera.

pub mod frustum;
pub mod model;
pub mod pyramid;

pub use frustum::{culling_frustum, project_sphere, sphere_in_frustum};
pub use model::{CullObject, CullingModel, DepthBuffer, FrameCull};
pub use pyramid::{DepthPyramidModel, PyramidExtent};

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::foundation::math::Mat4;

bitflags! {
    /// Switches read by the culling shaders from [`CullPushConstants::flags`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CullFlags: u32 {
        /// Test against the depth pyramid in the late pass
        const OCCLUSION = 1 << 0;
        /// Write indirect task records instead of indexed draws
        const MESH_SHADING = 1 << 1;
        /// Select a coarser LOD with distance
        const LOD = 1 << 2;
    }
}

/// Push constants of both culling dispatches
///
/// Matches `CullData` in `cull_common.glsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CullPushConstants {
    /// `[x.x, x.z, y.y, y.z]` of the normalised left/right and top/bottom planes
    pub frustum: [f32; 4],
    /// Projection `[0][0]`
    pub p00: f32,
    /// Projection `[1][1]`
    pub p11: f32,
    /// Near plane distance
    pub z_near: f32,
    /// LOD distance factor
    pub lod_target: f32,
    /// Width of depth pyramid level 0
    pub pyramid_width: f32,
    /// Height of depth pyramid level 0
    pub pyramid_height: f32,
    /// Number of render objects
    pub draw_count: u32,
    /// [`CullFlags`] bits
    pub flags: u32,
}

impl CullPushConstants {
    /// Derive culling parameters from an infinite reverse-Z projection
    pub fn new(
        projection: &Mat4,
        z_near: f32,
        pyramid: PyramidExtent,
        draw_count: u32,
        flags: CullFlags,
        lod_target: f32,
    ) -> Self {
        Self {
            frustum: culling_frustum(projection),
            p00: projection[(0, 0)],
            p11: projection[(1, 1)],
            z_near,
            lod_target,
            pyramid_width: pyramid.width as f32,
            pyramid_height: pyramid.height as f32,
            draw_count,
            flags: flags.bits(),
        }
    }

    /// The flag bits as [`CullFlags`]
    pub fn cull_flags(&self) -> CullFlags {
        CullFlags::from_bits_truncate(self.flags)
    }
}

/// LOD index for a sphere at `distance` from the camera
///
/// Each doubling of `distance * lod_target / radius` past 1 moves one LOD
/// coarser, stopping at the last one.
pub fn select_lod(distance: f32, radius: f32, lod_target: f32, lod_count: u32) -> u32 {
    if lod_count <= 1 || radius <= 0.0 {
        return 0;
    }
    let ratio = (distance.max(0.0) * lod_target / radius).max(1.0);
    (ratio.log2().floor() as u32).min(lod_count - 1)
}

/// Workgroup size of both culling shaders
pub const CULL_WORKGROUP_SIZE: u32 = 64;

/// Workgroups needed to cull `object_count` objects
pub fn cull_group_count(object_count: u32) -> u32 {
    object_count.div_ceil(CULL_WORKGROUP_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{deg_to_rad, perspective_infinite_reverse_z};
    use approx::assert_relative_eq;

    #[test]
    fn test_push_constant_layout() {
        assert_eq!(std::mem::size_of::<CullPushConstants>(), 48);
    }

    #[test]
    fn test_push_constants_from_projection() {
        let proj = perspective_infinite_reverse_z(deg_to_rad(90.0), 1.0, 0.1);
        let extent = PyramidExtent::for_draw_extent(1920, 1080);
        let pc = CullPushConstants::new(&proj, 0.1, extent, 7, CullFlags::OCCLUSION | CullFlags::LOD, 0.01);

        assert_relative_eq!(pc.p00, 1.0, epsilon = 1e-6);
        assert_relative_eq!(pc.p11, 1.0, epsilon = 1e-6);
        assert_eq!(pc.pyramid_width, 1024.0);
        assert_eq!(pc.draw_count, 7);
        assert!(pc.cull_flags().contains(CullFlags::OCCLUSION));
        assert!(!pc.cull_flags().contains(CullFlags::MESH_SHADING));
    }

    #[test]
    fn test_select_lod() {
        assert_eq!(select_lod(10.0, 1.0, 0.01, 4), 0);
        assert_eq!(select_lod(200.0, 1.0, 0.01, 4), 1);
        assert_eq!(select_lod(450.0, 1.0, 0.01, 4), 2);
        assert_eq!(select_lod(1.0e6, 1.0, 0.01, 4), 3);
        assert_eq!(select_lod(1.0e6, 1.0, 0.01, 1), 0);
    }

    #[test]
    fn test_group_count_rounds_up() {
        assert_eq!(cull_group_count(0), 0);
        assert_eq!(cull_group_count(1), 1);
        assert_eq!(cull_group_count(64), 1);
        assert_eq!(cull_group_count(65), 2);
    }
}
