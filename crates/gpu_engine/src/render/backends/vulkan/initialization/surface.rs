//! Presentation surface collaborator
//!
//! The renderer never talks to a windowing library. Whatever owns the window
//! implements [`SurfaceProvider`]; [`super::window::Window`] is the glfw one.

use ash::{vk, Entry, Instance};

use super::context::VulkanResult;

/// Source of instance extensions, the presentation surface and its size
pub trait SurfaceProvider {
    /// Instance extensions needed to create the surface
    fn required_instance_extensions(&self) -> VulkanResult<Vec<String>>;

    /// Create the surface for `instance`; the context destroys it on drop
    fn create_surface(&mut self, entry: &Entry, instance: &Instance) -> VulkanResult<vk::SurfaceKHR>;

    /// Current framebuffer size in pixels, `(0, 0)` while minimised
    fn framebuffer_extent(&self) -> (u32, u32);
}
