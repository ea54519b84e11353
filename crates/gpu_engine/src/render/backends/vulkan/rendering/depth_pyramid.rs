//! GPU depth pyramid
//!
//! A min-reduced mip chain of the first pass's depth, rebuilt every frame
//! and sampled by the late cull. Level 0 is the previous power of two of the
//! draw extent on each axis; see [`PyramidExtent`].

use std::sync::Arc;

use ash::extensions::khr;
use ash::{vk, Device};

use super::commands::{pipeline_barrier, ImageTransition, ImageUsage};
use super::pipeline_layout::PyramidPushConstants;
use super::shader::ComputePipeline;
use crate::render::backends::vulkan::resources::descriptor_set::PushDescriptorWrites;
use crate::render::backends::vulkan::resources::image::{AllocatedImage, ImageDesc, Sampler};
use crate::render::backends::vulkan::state::sync::MemoryBarrierBuilder;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};
use crate::render::culling::PyramidExtent;

/// Pyramid texel format
pub const PYRAMID_FORMAT: vk::Format = vk::Format::R32_SFLOAT;

/// Workgroup edge of `depth_pyramid.comp`
pub const PYRAMID_WORKGROUP_SIZE: u32 = 32;

/// What happens to the min sampler when the pyramid is recreated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SamplerPolicy {
    /// Keep the existing sampler
    #[default]
    Reuse,
    /// Destroy it and create a new one
    Recreate,
}

/// One reduction dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PyramidStep {
    /// Level written
    pub level: u32,
    /// Level width
    pub width: u32,
    /// Level height
    pub height: u32,
    /// Workgroups along x and y
    pub groups: (u32, u32),
}

/// Dispatches that build every level of `extent`, level 0 first
pub fn generation_steps(extent: PyramidExtent) -> Vec<PyramidStep> {
    (0..extent.mip_count)
        .map(|level| {
            let (width, height) = extent.level_extent(level);
            PyramidStep {
                level,
                width,
                height,
                groups: (
                    width.div_ceil(PYRAMID_WORKGROUP_SIZE),
                    height.div_ceil(PYRAMID_WORKGROUP_SIZE),
                ),
            }
        })
        .collect()
}

/// The pyramid's previous frame reads must finish before it is overwritten
const PYRAMID_RETIRED: ImageUsage = ImageUsage {
    layout: vk::ImageLayout::UNDEFINED,
    stage: vk::PipelineStageFlags2::COMPUTE_SHADER,
    access: vk::AccessFlags2::NONE,
};

/// Depth pyramid image with per-level views and its min-reduction sampler
pub struct DepthPyramid {
    device: Device,
    allocator: Arc<vk_mem::Allocator>,
    level_views: Vec<vk::ImageView>,
    image: AllocatedImage,
    sampler: Sampler,
    extent: PyramidExtent,
}

impl DepthPyramid {
    /// Pyramid for a draw target of `draw_extent`
    pub fn new(device: &Device, allocator: Arc<vk_mem::Allocator>, draw_extent: vk::Extent2D) -> VulkanResult<Self> {
        let sampler = Sampler::min_reduction(device.clone())?;
        let extent = PyramidExtent::for_draw_extent(draw_extent.width, draw_extent.height);
        let (image, level_views) = create_image(device, &allocator, extent)?;

        log::info!(
            "[PYRAMID] {}x{} with {} levels",
            extent.width,
            extent.height,
            extent.mip_count
        );
        Ok(Self {
            device: device.clone(),
            allocator,
            level_views,
            image,
            sampler,
            extent,
        })
    }

    /// Rebuild the image for a new draw extent
    ///
    /// The caller makes sure the GPU no longer uses the old image.
    pub fn recreate(&mut self, draw_extent: vk::Extent2D, policy: SamplerPolicy) -> VulkanResult<()> {
        let extent = PyramidExtent::for_draw_extent(draw_extent.width, draw_extent.height);
        let (image, level_views) = create_image(&self.device, &self.allocator, extent)?;

        destroy_views(&self.device, &mut self.level_views);
        self.image = image;
        self.level_views = level_views;
        self.extent = extent;

        if policy == SamplerPolicy::Recreate {
            self.sampler = Sampler::min_reduction(self.device.clone())?;
        }

        log::debug!(
            "[PYRAMID] Recreated at {}x{} with {} levels",
            extent.width,
            extent.height,
            extent.mip_count
        );
        Ok(())
    }

    /// Record the reduction of `depth_view` into every level
    ///
    /// `depth_view` must be in `SHADER_READ_ONLY_OPTIMAL`. The pyramid is left
    /// in `GENERAL` with its writes visible to compute shaders.
    pub fn record_generation(
        &self,
        push_descriptor: &khr::PushDescriptor,
        command_buffer: vk::CommandBuffer,
        pipeline: &ComputePipeline,
        depth_view: vk::ImageView,
    ) {
        ImageTransition::new(
            self.image.handle(),
            self.image.desc().full_range(),
            PYRAMID_RETIRED,
            ImageUsage::COMPUTE_GENERAL,
        )
        .record(&self.device, command_buffer);

        pipeline.bind(command_buffer);
        for step in generation_steps(self.extent) {
            let (source, source_layout) = if step.level == 0 {
                (depth_view, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            } else {
                (self.level_views[step.level as usize - 1], vk::ImageLayout::GENERAL)
            };

            PushDescriptorWrites::new()
                .storage_image(0, self.level_views[step.level as usize])
                .sampled_image(1, source, self.sampler.handle(), source_layout)
                .push(push_descriptor, command_buffer, vk::PipelineBindPoint::COMPUTE, pipeline.layout());

            let constants = PyramidPushConstants::new(step.width, step.height);
            unsafe {
                self.device.cmd_push_constants(
                    command_buffer,
                    pipeline.layout(),
                    vk::ShaderStageFlags::COMPUTE,
                    0,
                    bytemuck::bytes_of(&constants),
                );
                self.device.cmd_dispatch(command_buffer, step.groups.0, step.groups.1, 1);
            }

            pipeline_barrier(
                &self.device,
                command_buffer,
                &[MemoryBarrierBuilder::compute_write_to_compute_read()],
                &[],
            );
        }
    }

    /// Level 0 extent and level count
    pub fn extent(&self) -> PyramidExtent {
        self.extent
    }

    /// View over the whole chain, sampled by the late cull
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    /// View of one level
    pub fn level_view(&self, level: u32) -> VulkanResult<vk::ImageView> {
        self.level_views
            .get(level as usize)
            .copied()
            .ok_or(VulkanError::InvalidOperation {
                reason: format!("depth pyramid has no level {}", level),
            })
    }

    /// Min-reduction sampler
    pub fn sampler(&self) -> vk::Sampler {
        self.sampler.handle()
    }

    /// Pyramid image
    pub fn image(&self) -> vk::Image {
        self.image.handle()
    }
}

impl Drop for DepthPyramid {
    fn drop(&mut self) {
        destroy_views(&self.device, &mut self.level_views);
    }
}

fn create_image(
    device: &Device,
    allocator: &Arc<vk_mem::Allocator>,
    extent: PyramidExtent,
) -> VulkanResult<(AllocatedImage, Vec<vk::ImageView>)> {
    let desc = ImageDesc::color(
        vk::Extent2D {
            width: extent.width,
            height: extent.height,
        },
        PYRAMID_FORMAT,
        vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC,
    )
    .with_mips(extent.mip_count);
    let image = AllocatedImage::new(device.clone(), allocator.clone(), desc, "depth pyramid")?;

    let mut views = Vec::with_capacity(extent.mip_count as usize);
    for level in 0..extent.mip_count {
        match image.create_view(level, 1) {
            Ok(view) => views.push(view),
            Err(e) => {
                destroy_views(device, &mut views);
                return Err(e);
            }
        }
    }
    Ok((image, views))
}

fn destroy_views(device: &Device, views: &mut Vec<vk::ImageView>) {
    for view in views.drain(..) {
        unsafe { device.destroy_image_view(view, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_cover_every_level() {
        let extent = PyramidExtent::for_draw_extent(1920, 1080);
        let steps = generation_steps(extent);
        assert_eq!(steps.len() as u32, extent.mip_count);
        assert_eq!(steps[0].width, 1024);
        assert_eq!(steps[0].height, 1024);
        assert_eq!(steps[0].groups, (32, 32));
        assert!(steps.windows(2).all(|pair| pair[1].level == pair[0].level + 1));
    }

    #[test]
    fn test_small_levels_still_dispatch() {
        let steps = generation_steps(PyramidExtent::for_draw_extent(800, 600));
        // 512x512 halves nine times, the last level written is 2x2
        let last = steps.last().unwrap();
        assert_eq!(steps.len(), 9);
        assert_eq!((last.width, last.height), (2, 2));
        assert_eq!(last.groups, (1, 1));
        // 512x512 on the first level
        assert_eq!(steps[0].groups, (16, 16));
    }

    #[test]
    fn test_default_policy_keeps_sampler() {
        assert_eq!(SamplerPolicy::default(), SamplerPolicy::Reuse);
    }
}
