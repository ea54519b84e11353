//! Offscreen colour and depth attachments
//!
//! The scene is drawn at the swapchain extent into these images and the
//! colour result is blitted into the acquired swapchain image. Both are
//! recreated together on resize.

use std::sync::Arc;

use ash::{vk, Device};

use crate::render::backends::vulkan::rendering::pipeline_state::AttachmentFormats;
use crate::render::backends::vulkan::resources::image::{AllocatedImage, ImageDesc};
use crate::render::backends::vulkan::VulkanResult;

/// Colour attachment format, also written by the background shader
pub const COLOR_FORMAT: vk::Format = vk::Format::R16G16B16A16_SFLOAT;

/// Depth attachment format, read by the depth pyramid
pub const DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Usage of the colour attachment: drawn, blitted, cleared and written by compute
pub fn color_usage() -> vk::ImageUsageFlags {
    vk::ImageUsageFlags::COLOR_ATTACHMENT
        | vk::ImageUsageFlags::TRANSFER_SRC
        | vk::ImageUsageFlags::TRANSFER_DST
        | vk::ImageUsageFlags::STORAGE
}

/// Usage of the depth attachment: depth-tested and sampled for the pyramid
pub fn depth_usage() -> vk::ImageUsageFlags {
    vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED
}

/// The draw targets of one swapchain extent
pub struct RenderAttachments {
    color: AllocatedImage,
    depth: AllocatedImage,
}

impl RenderAttachments {
    /// Allocate both attachments at `extent`
    pub fn new(device: &Device, allocator: Arc<vk_mem::Allocator>, extent: vk::Extent2D) -> VulkanResult<Self> {
        let color = AllocatedImage::new(
            device.clone(),
            allocator.clone(),
            ImageDesc::color(extent, COLOR_FORMAT, color_usage()),
            "colour attachment",
        )?;
        let depth = AllocatedImage::new(
            device.clone(),
            allocator,
            ImageDesc::depth(extent, DEPTH_FORMAT, depth_usage()),
            "depth attachment",
        )?;

        log::debug!("[FRAME] Attachments created at {}x{}", extent.width, extent.height);
        Ok(Self { color, depth })
    }

    /// Formats the graphics pipelines render to
    pub fn formats() -> AttachmentFormats {
        AttachmentFormats {
            color: COLOR_FORMAT,
            depth: DEPTH_FORMAT,
        }
    }

    /// Colour target
    pub fn color(&self) -> &AllocatedImage {
        &self.color
    }

    /// Depth target
    pub fn depth(&self) -> &AllocatedImage {
        &self.depth
    }

    /// Draw extent
    pub fn extent(&self) -> vk::Extent2D {
        self.color.extent()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_can_be_blitted_and_stored() {
        assert!(color_usage().contains(vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::STORAGE));
        assert!(depth_usage().contains(vk::ImageUsageFlags::SAMPLED));
        assert_eq!(RenderAttachments::formats().depth, DEPTH_FORMAT);
    }
}
