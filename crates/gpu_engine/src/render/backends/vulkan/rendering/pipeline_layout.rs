//! Descriptor set layouts and pipeline layouts of every pass
//!
//! The global layout, the depth pyramid layout and the background layout are
//! push-descriptor layouts created once with the renderer. The graphics
//! layout also needs the bindless texture layout, whose size is only known
//! once the scene's textures are uploaded, so it is built with the scene.

use ash::{vk, Device};
use bytemuck::{Pod, Zeroable};

use crate::render::backends::vulkan::resources::descriptor_set::{
    global_bindings, BindingVisibility, DescriptorSetLayout, DescriptorSetLayoutBuilder,
};
use crate::render::backends::vulkan::{VulkanError, VulkanResult};
use crate::render::culling::CullPushConstants;

/// Push constants of the depth pyramid shader: extent of the level being written
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PyramidPushConstants {
    /// Level width in texels
    pub width: f32,
    /// Level height in texels
    pub height: f32,
}

impl PyramidPushConstants {
    /// Constants for a level of `width` x `height`
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width as f32,
            height: height as f32,
        }
    }
}

/// Push constants of the background shader: a vertical gradient
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BackgroundPushConstants {
    /// Colour at the top row
    pub top: [f32; 4],
    /// Colour at the bottom row
    pub bottom: [f32; 4],
}

impl BackgroundPushConstants {
    /// Gradient from `clear` at the top to a darker shade at the bottom
    pub fn from_clear_color(clear: [f32; 4]) -> Self {
        Self {
            top: clear,
            bottom: [clear[0] * 0.25, clear[1] * 0.25, clear[2] * 0.25, clear[3]],
        }
    }
}

/// Push-descriptor set layouts created at renderer start
pub struct DescriptorLayouts {
    /// Scene buffers, view data and the depth pyramid
    pub global: DescriptorSetLayout,
    /// 0 = destination level (storage image), 1 = source level (min sampler)
    pub pyramid: DescriptorSetLayout,
    /// 0 = colour attachment as storage image
    pub background: DescriptorSetLayout,
}

impl DescriptorLayouts {
    /// Build all three layouts for the active geometry path
    pub fn new(device: &Device, visibility: BindingVisibility) -> VulkanResult<Self> {
        let global = DescriptorSetLayoutBuilder::new()
            .add_bindings(global_bindings(visibility))
            .push_descriptor()
            .build(device)?;
        let pyramid = DescriptorSetLayoutBuilder::new()
            .add_storage_image(0, vk::ShaderStageFlags::COMPUTE)
            .add_combined_image_sampler(1, vk::ShaderStageFlags::COMPUTE)
            .push_descriptor()
            .build(device)?;
        let background = DescriptorSetLayoutBuilder::new()
            .add_storage_image(0, vk::ShaderStageFlags::COMPUTE)
            .push_descriptor()
            .build(device)?;

        log::debug!(
            "[PIPELINE] Descriptor layouts created ({} global bindings)",
            global.bindings().len()
        );
        Ok(Self {
            global,
            pyramid,
            background,
        })
    }
}

/// Owned `VkPipelineLayout`
pub struct PipelineLayout {
    device: Device,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Layout over `set_layouts` with at most one compute push-constant range of `push_size` bytes
    pub fn new(device: &Device, set_layouts: &[vk::DescriptorSetLayout], push_size: u32) -> VulkanResult<Self> {
        let ranges = push_constant_ranges(push_size);
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(&ranges);

        let layout = unsafe {
            device.create_pipeline_layout(&layout_info, None).map_err(|e| {
                log::error!("[PIPELINE] vkCreatePipelineLayout failed: {:?}", e);
                VulkanError::Api(e)
            })?
        };

        Ok(Self {
            device: device.clone(),
            layout,
        })
    }

    /// Get layout handle
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

fn push_constant_ranges(size: u32) -> Vec<vk::PushConstantRange> {
    if size == 0 {
        return Vec::new();
    }
    vec![vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::COMPUTE,
        offset: 0,
        size,
    }]
}

fn push_size<T>() -> u32 {
    std::mem::size_of::<T>() as u32
}

/// Compute pipeline layouts created at renderer start
pub struct ComputeLayouts {
    /// Both culling passes: [global] + [`CullPushConstants`]
    pub cull: PipelineLayout,
    /// Depth pyramid: [pyramid] + [`PyramidPushConstants`]
    pub pyramid: PipelineLayout,
    /// Background: [background] + [`BackgroundPushConstants`]
    pub background: PipelineLayout,
}

impl ComputeLayouts {
    /// Build the compute layouts over `layouts`
    pub fn new(device: &Device, layouts: &DescriptorLayouts) -> VulkanResult<Self> {
        Ok(Self {
            cull: PipelineLayout::new(device, &[layouts.global.handle()], push_size::<CullPushConstants>())?,
            pyramid: PipelineLayout::new(device, &[layouts.pyramid.handle()], push_size::<PyramidPushConstants>())?,
            background: PipelineLayout::new(
                device,
                &[layouts.background.handle()],
                push_size::<BackgroundPushConstants>(),
            )?,
        })
    }
}

/// Graphics layout: set 0 = global push descriptors, set 1 = bindless textures
pub fn graphics_layout(
    device: &Device,
    global: &DescriptorSetLayout,
    textures: &DescriptorSetLayout,
) -> VulkanResult<PipelineLayout> {
    PipelineLayout::new(device, &[global.handle(), textures.handle()], 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_constant_sizes() {
        assert_eq!(push_size::<CullPushConstants>(), 48);
        assert_eq!(push_size::<PyramidPushConstants>(), 8);
        assert_eq!(push_size::<BackgroundPushConstants>(), 32);
        // Every range fits the guaranteed minimum of 128 bytes
        assert!(push_size::<CullPushConstants>() <= 128);
    }

    #[test]
    fn test_graphics_layout_has_no_push_range() {
        assert!(push_constant_ranges(0).is_empty());
        let ranges = push_constant_ranges(8);
        assert_eq!(ranges.len(), 1);
        assert_eq!(ranges[0].stage_flags, vk::ShaderStageFlags::COMPUTE);
        assert_eq!(ranges[0].offset, 0);
    }

    #[test]
    fn test_background_gradient() {
        let constants = BackgroundPushConstants::from_clear_color([0.4, 0.8, 1.0, 1.0]);
        assert_eq!(constants.top, [0.4, 0.8, 1.0, 1.0]);
        assert_eq!(constants.bottom, [0.1, 0.2, 0.25, 1.0]);
        assert_eq!(PyramidPushConstants::new(64, 32), PyramidPushConstants { width: 64.0, height: 32.0 });
    }
}
