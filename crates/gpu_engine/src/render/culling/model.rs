//! CPU reference of the two culling passes
//!
//! Runs the same decisions as the compute shaders over plain slices so the
//! frame-to-frame visibility protocol can be checked without a device.

use super::frustum::{project_sphere, sphere_in_frustum};
use super::pyramid::DepthPyramidModel;
use super::{CullFlags, CullPushConstants};
use crate::foundation::math::{rotate_by_quat, Mat4, Vec3, Vec4};
use crate::scene::SceneData;

/// World-space bounding sphere of a render object
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CullObject {
    /// Sphere centre in world space
    pub center: Vec3,
    /// Sphere radius in world space
    pub radius: f32,
}

impl CullObject {
    /// Create a bounding sphere
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// World-space spheres of every render object, computed like the shaders do
    pub fn from_scene(scene: &SceneData) -> Vec<Self> {
        scene
            .render_objects
            .iter()
            .map(|object| {
                let transform = &scene.transforms[object.transform_id as usize];
                let surface = &scene.surfaces[object.surface_id as usize];
                let local = Vec3::from(surface.center) * transform.scale;
                Self {
                    center: rotate_by_quat(transform.orientation, local) + Vec3::from(transform.position),
                    radius: surface.radius * transform.scale,
                }
            })
            .collect()
    }

    fn view_center(&self, view: &Mat4) -> Vec3 {
        (view * Vec4::new(self.center.x, self.center.y, self.center.z, 1.0)).xyz()
    }
}

/// Reverse-Z depth attachment, cleared to 0.0 (infinitely far)
#[derive(Debug, Clone, PartialEq)]
pub struct DepthBuffer {
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Row-major depth values
    pub data: Vec<f32>,
}

impl DepthBuffer {
    /// A buffer cleared to the far value
    pub fn cleared(width: u32, height: u32) -> Self {
        Self { width, height, data: vec![0.0; (width * height) as usize] }
    }

    /// Write `depth` over a UV rectangle `[min_u, min_v, max_u, max_v]`, keeping closer values
    pub fn write_rect(&mut self, rect: [f32; 4], depth: f32) {
        let to_x = |u: f32| (u.clamp(0.0, 1.0) * self.width as f32) as u32;
        let to_y = |v: f32| (v.clamp(0.0, 1.0) * self.height as f32) as u32;
        let (x0, x1) = (to_x(rect[0]), to_x(rect[2]).max(to_x(rect[0]) + 1).min(self.width));
        let (y0, y1) = (to_y(rect[1]), to_y(rect[3]).max(to_y(rect[1]) + 1).min(self.height));

        for y in y0..y1 {
            for x in x0..x1 {
                let texel = &mut self.data[(y * self.width + x) as usize];
                *texel = texel.max(depth);
            }
        }
    }

    /// Rasterize a sphere as a screen-aligned card at its far depth
    ///
    /// Stands in for real geometry in tests: the card covers the sphere's
    /// projected bounds, so it behaves like a solid occluder of that size.
    pub fn splat_sphere(&mut self, object: &CullObject, view: &Mat4, cull: &CullPushConstants) {
        let center = object.view_center(view);
        if let Some(rect) = project_sphere(center, object.radius, cull.z_near, cull.p00, cull.p11) {
            self.write_rect(rect, cull.z_near / (center.z + object.radius));
        }
    }
}

/// Draw lists produced for one frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameCull {
    /// Objects drawn by the first render pass
    pub initial: Vec<usize>,
    /// Objects drawn by the second render pass
    pub late: Vec<usize>,
    /// Pyramid the late pass tested against
    pub pyramid: DepthPyramidModel,
}

/// Persistent per-object visibility and the two culling passes over it
#[derive(Debug, Clone, PartialEq)]
pub struct CullingModel {
    visibility: Vec<u32>,
}

impl CullingModel {
    /// All objects start invisible, like the zero-filled GPU buffer
    pub fn new(object_count: usize) -> Self {
        Self { visibility: vec![0; object_count] }
    }

    /// Start from a given visibility state
    pub fn with_visibility(visibility: Vec<u32>) -> Self {
        Self { visibility }
    }

    /// Visibility written by the last late pass
    pub fn visibility(&self) -> &[u32] {
        &self.visibility
    }

    /// Objects that were visible last frame and are still in the frustum
    pub fn initial_pass(&self, objects: &[CullObject], view: &Mat4, cull: &CullPushConstants) -> Vec<usize> {
        objects
            .iter()
            .enumerate()
            .filter(|&(i, object)| self.visibility[i] != 0 && Self::in_frustum(object, view, cull))
            .map(|(i, _)| i)
            .collect()
    }

    /// Re-test every object, drawing the ones the initial pass skipped
    ///
    /// Updates visibility for the next frame's initial pass.
    pub fn late_pass(
        &mut self,
        objects: &[CullObject],
        view: &Mat4,
        cull: &CullPushConstants,
        pyramid: &DepthPyramidModel,
    ) -> Vec<usize> {
        let mut draws = Vec::new();
        for (i, object) in objects.iter().enumerate() {
            let visible = Self::is_visible(object, view, cull, pyramid);
            if visible && self.visibility[i] == 0 {
                draws.push(i);
            }
            self.visibility[i] = visible as u32;
        }
        draws
    }

    /// Frustum and occlusion result used by the late pass
    pub fn is_visible(object: &CullObject, view: &Mat4, cull: &CullPushConstants, pyramid: &DepthPyramidModel) -> bool {
        if !Self::in_frustum(object, view, cull) {
            return false;
        }
        if !cull.cull_flags().contains(CullFlags::OCCLUSION) {
            return true;
        }

        let center = object.view_center(view);
        let Some(rect) = project_sphere(center, object.radius, cull.z_near, cull.p00, cull.p11) else {
            return true;
        };

        let extent = pyramid.extent();
        let width = (rect[2] - rect[0]) * extent.width as f32;
        let height = (rect[3] - rect[1]) * extent.height as f32;
        let level = width.max(height).log2().floor();

        let depth = pyramid.sample([(rect[0] + rect[2]) * 0.5, (rect[1] + rect[3]) * 0.5], level);
        let sphere_depth = cull.z_near / (center.z - object.radius);
        sphere_depth > depth
    }

    fn in_frustum(object: &CullObject, view: &Mat4, cull: &CullPushConstants) -> bool {
        sphere_in_frustum(object.view_center(view), object.radius, cull.frustum, cull.z_near)
    }

    /// Run a whole frame: initial pass, first draw, pyramid, late pass, second draw
    ///
    /// `rasterize` receives the objects of each render pass and the depth
    /// attachment they draw into.
    pub fn run_frame(
        &mut self,
        objects: &[CullObject],
        view: &Mat4,
        cull: &CullPushConstants,
        extent: (u32, u32),
        mut rasterize: impl FnMut(&[usize], &mut DepthBuffer),
    ) -> FrameCull {
        let mut depth = DepthBuffer::cleared(extent.0, extent.1);

        let initial = self.initial_pass(objects, view, cull);
        rasterize(&initial, &mut depth);

        let pyramid = DepthPyramidModel::build(&depth.data, depth.width, depth.height);
        let late = self.late_pass(objects, view, cull, &pyramid);
        rasterize(&late, &mut depth);

        FrameCull { initial, late, pyramid }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{deg_to_rad, look_at, perspective_infinite_reverse_z};
    use crate::render::culling::PyramidExtent;

    const EXTENT: (u32, u32) = (64, 64);
    const Z_NEAR: f32 = 0.1;

    struct Camera {
        view: Mat4,
        cull: CullPushConstants,
    }

    fn camera(eye: Vec3, target: Vec3, object_count: usize) -> Camera {
        let projection = perspective_infinite_reverse_z(deg_to_rad(60.0), 1.0, Z_NEAR);
        Camera {
            view: look_at(eye, target, Vec3::y()),
            cull: CullPushConstants::new(
                &projection,
                Z_NEAR,
                PyramidExtent::for_draw_extent(EXTENT.0, EXTENT.1),
                object_count as u32,
                CullFlags::OCCLUSION,
                0.01,
            ),
        }
    }

    fn frame(model: &mut CullingModel, objects: &[CullObject], cam: &Camera) -> FrameCull {
        model.run_frame(objects, &cam.view, &cam.cull, EXTENT, |drawn, depth| {
            for &i in drawn {
                depth.splat_sphere(&objects[i], &cam.view, &cam.cull);
            }
        })
    }

    fn unit_cube_at(x: f32, y: f32, z: f32) -> CullObject {
        CullObject::new(Vec3::new(x, y, z), 0.75f32.sqrt())
    }

    fn wall_and_hidden_object() -> (Vec<CullObject>, Camera) {
        let objects = vec![CullObject::new(Vec3::zeros(), 3.0), unit_cube_at(0.0, 0.0, 10.0)];
        let cam = camera(Vec3::new(0.0, 0.0, -5.0), Vec3::zeros(), objects.len());
        (objects, cam)
    }

    #[test]
    fn test_single_visible_object_is_drawn_late_on_first_frame() {
        let objects = [unit_cube_at(0.0, 0.0, 0.0)];
        let cam = camera(Vec3::new(0.0, 0.0, -5.0), Vec3::zeros(), 1);
        let mut model = CullingModel::new(1);

        let result = frame(&mut model, &objects, &cam);

        assert!(result.initial.is_empty());
        assert_eq!(result.late, vec![0]);
        assert_eq!(model.visibility(), &[1]);
    }

    #[test]
    fn test_visible_object_moves_to_initial_pass_on_next_frame() {
        let objects = [unit_cube_at(0.0, 0.0, 0.0)];
        let cam = camera(Vec3::new(0.0, 0.0, -5.0), Vec3::zeros(), 1);
        let mut model = CullingModel::new(1);

        frame(&mut model, &objects, &cam);
        let second = frame(&mut model, &objects, &cam);

        assert_eq!(second.initial, vec![0]);
        assert!(second.late.is_empty());
        assert_eq!(model.visibility(), &[1]);
    }

    #[test]
    fn test_object_behind_occluder_is_rejected() {
        let (objects, cam) = wall_and_hidden_object();
        // The wall was visible last frame, the hidden object was not
        let mut model = CullingModel::with_visibility(vec![1, 0]);

        let result = frame(&mut model, &objects, &cam);

        assert_eq!(result.initial, vec![0]);
        assert!(result.late.is_empty());
        assert_eq!(model.visibility(), &[1, 0]);
    }

    #[test]
    fn test_occlusion_settles_after_warm_up() {
        let (objects, cam) = wall_and_hidden_object();
        let mut model = CullingModel::new(objects.len());

        // Frame 0: nothing trusted yet, both objects drawn late
        let first = frame(&mut model, &objects, &cam);
        assert_eq!(first.late, vec![0, 1]);

        // Frame 1: both drawn early, the hidden object is then found occluded
        let second = frame(&mut model, &objects, &cam);
        assert_eq!(second.initial, vec![0, 1]);
        assert!(second.late.is_empty());
        assert_eq!(model.visibility(), &[1, 0]);

        // Frame 2: only the wall is drawn
        let third = frame(&mut model, &objects, &cam);
        assert_eq!(third.initial, vec![0]);
        assert!(third.late.is_empty());
    }

    #[test]
    fn test_zero_visibility_draws_nothing_early() {
        let objects: Vec<CullObject> = (0..16).map(|i| unit_cube_at(i as f32 * 2.0 - 15.0, 0.0, 20.0)).collect();
        let cam = camera(Vec3::new(0.0, 0.0, -5.0), Vec3::new(0.0, 0.0, 20.0), objects.len());
        let model = CullingModel::new(objects.len());
        assert!(model.initial_pass(&objects, &cam.view, &cam.cull).is_empty());
    }

    #[test]
    fn test_object_leaving_frustum_is_dropped_from_both_passes() {
        let objects = [unit_cube_at(0.0, 0.0, 0.0)];
        let mut model = CullingModel::with_visibility(vec![1]);
        // Looking away from the object
        let cam = camera(Vec3::new(0.0, 0.0, -5.0), Vec3::new(0.0, 0.0, -10.0), 1);

        let result = frame(&mut model, &objects, &cam);

        assert!(result.initial.is_empty());
        assert!(result.late.is_empty());
        assert_eq!(model.visibility(), &[0]);
    }

    #[test]
    fn test_occlusion_disabled_keeps_hidden_object() {
        let (objects, mut cam) = wall_and_hidden_object();
        cam.cull.flags = CullFlags::empty().bits();
        let mut model = CullingModel::with_visibility(vec![1, 0]);

        let result = frame(&mut model, &objects, &cam);
        assert_eq!(result.late, vec![1]);
    }

    #[test]
    fn test_no_double_draw_and_visibility_matches_late_tests() {
        let objects: Vec<CullObject> = (0..5)
            .flat_map(|x| (0..5).map(move |z| unit_cube_at(x as f32 * 3.0 - 6.0, 0.0, z as f32 * 3.0)))
            .chain(std::iter::once(CullObject::new(Vec3::new(0.0, 0.0, -1.0), 2.5)))
            .collect();
        let mut model = CullingModel::new(objects.len());

        for step in 0..6 {
            let eye = Vec3::new(step as f32 - 3.0, 1.0, -8.0);
            let cam = camera(eye, Vec3::new(0.0, 0.0, 6.0), objects.len());
            let result = frame(&mut model, &objects, &cam);

            for i in &result.late {
                assert!(!result.initial.contains(i), "object {} drawn twice in step {}", i, step);
            }
            for (i, object) in objects.iter().enumerate() {
                let expected = CullingModel::is_visible(object, &cam.view, &cam.cull, &result.pyramid);
                assert_eq!(model.visibility()[i], expected as u32);
            }
        }
    }
}
