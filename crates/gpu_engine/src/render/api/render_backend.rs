//! Backend abstraction for the embedding application
//!
//! The application talks to the renderer through [`RenderBackend`] so it does
//! not depend on Vulkan types.

use super::frame_data::RenderContext;
use crate::assets::DecodedImage;
use crate::render::backends::vulkan::resources::texture_table::TextureHandle;
use crate::render::backends::vulkan::VulkanError;
use crate::scene::SceneProvider;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, VulkanError>;

/// Main rendering backend trait
pub trait RenderBackend {
    /// Current swapchain extent (width, height)
    fn swapchain_extent(&self) -> (u32, u32);

    /// Upload a decoded texture into the bindless table
    ///
    /// Textures must be uploaded before the scene that references them.
    fn upload_texture(&mut self, image: &DecodedImage) -> BackendResult<TextureHandle>;

    /// Upload a whole scene, replacing any previous one
    fn upload_scene(&mut self, provider: &dyn SceneProvider) -> BackendResult<()>;

    /// Cull and draw one frame
    fn draw_frame(&mut self, ctx: &RenderContext<'_>) -> BackendResult<()>;

    /// Block until the GPU is idle
    fn wait_idle(&self) -> BackendResult<()>;
}
