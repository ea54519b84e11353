//! Per-frame data handed to the renderer by the embedding application

use bytemuck::{Pod, Zeroable};

use crate::foundation::math::{perspective_infinite_reverse_z, Mat4, Vec3};

/// A surface placed with a transform, as known to the application
///
/// The GPU draws the uploaded render objects; requests only report what the
/// application expects to see this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawRequest {
    /// Surface index
    pub surface_id: u32,
    /// Transform index
    pub transform_id: u32,
}

/// Everything the renderer needs from the application for one frame
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    /// World to view, +Z forward
    pub view: Mat4,
    /// Infinite reverse-Z projection
    pub projection: Mat4,
    /// `projection * view`
    pub projection_view: Mat4,
    /// Camera position in world space
    pub view_position: Vec3,
    /// Near plane distance used by `projection`
    pub z_near: f32,
    /// Framebuffer width
    pub window_width: u32,
    /// Framebuffer height
    pub window_height: u32,
    /// Set by the application when the framebuffer size changed
    pub window_resized: bool,
    /// Direction the sunlight travels
    pub sun_direction: Vec3,
    /// Sunlight colour
    pub sun_color: Vec3,
    /// Draws the application asked for
    pub draw_requests: &'a [DrawRequest],
}

impl<'a> RenderContext<'a> {
    /// Context for a perspective camera with the given view matrix
    pub fn perspective(view: Mat4, view_position: Vec3, fov_y: f32, z_near: f32, width: u32, height: u32) -> Self {
        let aspect = width.max(1) as f32 / height.max(1) as f32;
        let projection = perspective_infinite_reverse_z(fov_y, aspect, z_near);
        Self {
            view,
            projection,
            projection_view: projection * view,
            view_position,
            z_near,
            window_width: width,
            window_height: height,
            window_resized: false,
            sun_direction: Vec3::new(-0.577_35, -0.577_35, 0.577_35),
            sun_color: Vec3::repeat(0.8),
            draw_requests: &[],
        }
    }

    /// Attach this frame's draw requests
    pub fn with_draw_requests(mut self, draw_requests: &'a [DrawRequest]) -> Self {
        self.draw_requests = draw_requests;
        self
    }

    /// Mark the framebuffer as resized
    pub fn with_resized(mut self, resized: bool) -> Self {
        self.window_resized = resized;
        self
    }

    /// Transposed projection, whose rows are the clip planes used for culling
    pub fn projection_transposed(&self) -> Mat4 {
        self.projection.transpose()
    }

    /// Number of draw requests
    pub fn draw_count(&self) -> usize {
        self.draw_requests.len()
    }

    /// Whether the framebuffer has no area, e.g. a minimised window
    pub fn is_minimized(&self) -> bool {
        self.window_width == 0 || self.window_height == 0
    }
}

/// Camera uniform read by every stage through binding 0
///
/// Matches `ViewData` in `common.glsl`; matrices are column-major.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraViewData {
    /// World to view
    pub view: [[f32; 4]; 4],
    /// World to clip
    pub projection_view: [[f32; 4]; 4],
    /// Camera position, w unused
    pub view_position: [f32; 4],
    /// Sun direction, w unused
    pub sun_direction: [f32; 4],
    /// Sun colour, w unused
    pub sun_color: [f32; 4],
}

impl CameraViewData {
    /// Uniform contents for `ctx`
    pub fn from_context(ctx: &RenderContext<'_>) -> Self {
        let extend = |v: Vec3| [v.x, v.y, v.z, 0.0];
        Self {
            view: ctx.view.into(),
            projection_view: ctx.projection_view.into(),
            view_position: [ctx.view_position.x, ctx.view_position.y, ctx.view_position.z, 1.0],
            sun_direction: extend(ctx.sun_direction),
            sun_color: extend(ctx.sun_color),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{deg_to_rad, look_at};

    #[test]
    fn test_view_data_layout() {
        assert_eq!(std::mem::size_of::<CameraViewData>(), 176);
    }

    #[test]
    fn test_matrices_are_column_major() {
        let eye = Vec3::new(1.0, 2.0, 3.0);
        let view = look_at(eye, Vec3::zeros(), Vec3::y());
        let ctx = RenderContext::perspective(view, eye, deg_to_rad(45.0), 0.1, 1280, 720);
        let data = CameraViewData::from_context(&ctx);

        // Translation lives in the last column
        assert_eq!(data.view[3][0], view[(0, 3)]);
        assert_eq!(data.view[3][2], view[(2, 3)]);
        assert_eq!(data.view_position, [1.0, 2.0, 3.0, 1.0]);
    }

    #[test]
    fn test_minimized_window() {
        let ctx = RenderContext::perspective(Mat4::identity(), Vec3::zeros(), 1.0, 0.1, 0, 720);
        assert!(ctx.is_minimized());
        assert!(ctx.projection[(0, 0)].is_finite());
    }

    #[test]
    fn test_draw_requests_are_counted() {
        let requests = [DrawRequest { surface_id: 0, transform_id: 0 }, DrawRequest { surface_id: 0, transform_id: 1 }];
        let ctx = RenderContext::perspective(Mat4::identity(), Vec3::zeros(), 1.0, 0.1, 4, 4)
            .with_draw_requests(&requests)
            .with_resized(true);
        assert_eq!(ctx.draw_count(), 2);
        assert!(ctx.window_resized);
    }
}
