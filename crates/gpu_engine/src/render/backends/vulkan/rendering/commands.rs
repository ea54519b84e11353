//! Command pools, one-shot submissions and image transitions
//!
//! Frame recording works on raw `vk::CommandBuffer`s; this module provides
//! the pieces around them: pool lifetime, the blocking one-time submit used
//! by uploads, and `synchronization2` image barriers.

use ash::{vk, Device};

use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Command pool wrapper with RAII cleanup
pub struct CommandPool {
    device: Device,
    command_pool: vk::CommandPool,
}

impl CommandPool {
    /// Create a new command pool
    pub fn new(device: Device, queue_family_index: u32, flags: vk::CommandPoolCreateFlags) -> VulkanResult<Self> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(flags)
            .queue_family_index(queue_family_index);

        let command_pool = unsafe {
            device
                .create_command_pool(&pool_create_info, None)
                .map_err(VulkanError::Api)?
        };

        Ok(Self { device, command_pool })
    }

    /// Allocate one primary command buffer
    pub fn allocate_primary(&self) -> VulkanResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffers = unsafe {
            self.device
                .allocate_command_buffers(&alloc_info)
                .map_err(VulkanError::Api)?
        };

        command_buffers.into_iter().next().ok_or(VulkanError::InvalidOperation {
            reason: "command buffer allocation returned nothing".to_string(),
        })
    }

    /// Reset every command buffer allocated from the pool
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe {
            self.device
                .reset_command_pool(self.command_pool, vk::CommandPoolResetFlags::empty())
                .map_err(VulkanError::Api)
        }
    }

    /// Record with `record`, submit to `queue` and block until the queue is idle
    ///
    /// The command buffer is freed afterwards whether or not recording succeeded.
    pub fn one_time_submit<F>(&self, queue: vk::Queue, record: F) -> VulkanResult<()>
    where
        F: FnOnce(vk::CommandBuffer) -> VulkanResult<()>,
    {
        let command_buffer = self.allocate_primary()?;
        let result = self.record_and_submit(queue, command_buffer, record);
        unsafe { self.device.free_command_buffers(self.command_pool, &[command_buffer]) };
        result
    }

    fn record_and_submit<F>(&self, queue: vk::Queue, command_buffer: vk::CommandBuffer, record: F) -> VulkanResult<()>
    where
        F: FnOnce(vk::CommandBuffer) -> VulkanResult<()>,
    {
        begin_one_time(&self.device, command_buffer)?;
        record(command_buffer)?;
        unsafe {
            self.device.end_command_buffer(command_buffer).map_err(VulkanError::Api)?;
        }

        let command_buffer_infos = [vk::CommandBufferSubmitInfo::builder().command_buffer(command_buffer).build()];
        let submit = vk::SubmitInfo2::builder().command_buffer_infos(&command_buffer_infos);

        unsafe {
            self.device
                .queue_submit2(queue, &[submit.build()], vk::Fence::null())
                .map_err(VulkanError::Api)?;
            self.device.queue_wait_idle(queue).map_err(VulkanError::Api)
        }
    }

    /// Get the command pool handle
    pub fn handle(&self) -> vk::CommandPool {
        self.command_pool
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

/// Begin a command buffer for a single submission
pub fn begin_one_time(device: &Device, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
    let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe {
        device
            .begin_command_buffer(command_buffer, &begin_info)
            .map_err(VulkanError::Api)
    }
}

/// Record one `vkCmdPipelineBarrier2` with global and image barriers
pub fn pipeline_barrier(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    memory_barriers: &[vk::MemoryBarrier2],
    image_barriers: &[vk::ImageMemoryBarrier2],
) {
    let dependency_info = vk::DependencyInfo::builder()
        .memory_barriers(memory_barriers)
        .image_memory_barriers(image_barriers);
    unsafe { device.cmd_pipeline_barrier2(command_buffer, &dependency_info) };
}

/// Layout plus the stage and access scope an image is used with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageUsage {
    /// Image layout
    pub layout: vk::ImageLayout,
    /// Pipeline stages touching the image
    pub stage: vk::PipelineStageFlags2,
    /// Accesses made by those stages
    pub access: vk::AccessFlags2,
}

impl ImageUsage {
    /// Contents don't matter
    pub const UNDEFINED: Self = Self {
        layout: vk::ImageLayout::UNDEFINED,
        stage: vk::PipelineStageFlags2::TOP_OF_PIPE,
        access: vk::AccessFlags2::NONE,
    };

    /// Colour attachment written by dynamic rendering
    pub const COLOR_ATTACHMENT: Self = Self {
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        stage: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        access: vk::AccessFlags2::from_raw(
            vk::AccessFlags2::COLOR_ATTACHMENT_READ.as_raw() | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw(),
        ),
    };

    /// Depth attachment tested and written by dynamic rendering
    pub const DEPTH_ATTACHMENT: Self = Self {
        layout: vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        stage: vk::PipelineStageFlags2::from_raw(
            vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw() | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
        ),
        access: vk::AccessFlags2::from_raw(
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
        ),
    };

    /// Sampled by compute shaders
    pub const COMPUTE_SAMPLED: Self = Self {
        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        stage: vk::PipelineStageFlags2::COMPUTE_SHADER,
        access: vk::AccessFlags2::SHADER_SAMPLED_READ,
    };

    /// Read and written as a storage image by compute shaders
    pub const COMPUTE_GENERAL: Self = Self {
        layout: vk::ImageLayout::GENERAL,
        stage: vk::PipelineStageFlags2::COMPUTE_SHADER,
        access: vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_STORAGE_READ.as_raw()
                | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw()
                | vk::AccessFlags2::SHADER_SAMPLED_READ.as_raw(),
        ),
    };

    /// Sampled by fragment shaders
    pub const FRAGMENT_SAMPLED: Self = Self {
        layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        stage: vk::PipelineStageFlags2::FRAGMENT_SHADER,
        access: vk::AccessFlags2::SHADER_SAMPLED_READ,
    };

    /// Source of a blit or copy
    pub const TRANSFER_SRC: Self = Self {
        layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        stage: vk::PipelineStageFlags2::TRANSFER,
        access: vk::AccessFlags2::TRANSFER_READ,
    };

    /// Destination of a blit or copy
    pub const TRANSFER_DST: Self = Self {
        layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        stage: vk::PipelineStageFlags2::TRANSFER,
        access: vk::AccessFlags2::TRANSFER_WRITE,
    };

    /// Handed to the presentation engine
    pub const PRESENT: Self = Self {
        layout: vk::ImageLayout::PRESENT_SRC_KHR,
        stage: vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
        access: vk::AccessFlags2::NONE,
    };
}

/// Layout transition of a subresource range between two usages
#[derive(Debug, Clone, Copy)]
pub struct ImageTransition {
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    from: ImageUsage,
    to: ImageUsage,
}

impl ImageTransition {
    /// Transition `range` of `image` from `from` to `to`
    pub fn new(image: vk::Image, range: vk::ImageSubresourceRange, from: ImageUsage, to: ImageUsage) -> Self {
        Self { image, range, from, to }
    }

    /// Single-level colour transition
    pub fn color(image: vk::Image, from: ImageUsage, to: ImageUsage) -> Self {
        Self::new(image, subresource_range(vk::ImageAspectFlags::COLOR, 0, 1), from, to)
    }

    /// Single-level depth transition
    pub fn depth(image: vk::Image, from: ImageUsage, to: ImageUsage) -> Self {
        Self::new(image, subresource_range(vk::ImageAspectFlags::DEPTH, 0, 1), from, to)
    }

    /// The `VkImageMemoryBarrier2` for this transition
    pub fn barrier(&self) -> vk::ImageMemoryBarrier2 {
        vk::ImageMemoryBarrier2::builder()
            .src_stage_mask(self.from.stage)
            .src_access_mask(self.from.access)
            .dst_stage_mask(self.to.stage)
            .dst_access_mask(self.to.access)
            .old_layout(self.from.layout)
            .new_layout(self.to.layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(self.image)
            .subresource_range(self.range)
            .build()
    }

    /// Record this transition on its own
    pub fn record(&self, device: &Device, command_buffer: vk::CommandBuffer) {
        pipeline_barrier(device, command_buffer, &[], &[self.barrier()]);
    }
}

/// Subresource range over one array layer
pub fn subresource_range(aspect: vk::ImageAspectFlags, base_level: u32, level_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: base_level,
        level_count,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Region scaling all of `src_extent` onto all of `dst_extent`
pub fn blit_region(src_extent: vk::Extent2D, dst_extent: vk::Extent2D) -> vk::ImageBlit2 {
    let layers = vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    };
    let corner = |extent: vk::Extent2D| vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: 1,
    };

    vk::ImageBlit2::builder()
        .src_subresource(layers)
        .src_offsets([vk::Offset3D::default(), corner(src_extent)])
        .dst_subresource(layers)
        .dst_offsets([vk::Offset3D::default(), corner(dst_extent)])
        .build()
}

/// Blit `src` (TRANSFER_SRC) onto `dst` (TRANSFER_DST) with linear filtering
pub fn blit_image(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    src: vk::Image,
    src_extent: vk::Extent2D,
    dst: vk::Image,
    dst_extent: vk::Extent2D,
) {
    let regions = [blit_region(src_extent, dst_extent)];
    let blit_info = vk::BlitImageInfo2::builder()
        .src_image(src)
        .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
        .dst_image(dst)
        .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
        .filter(vk::Filter::LINEAR)
        .regions(&regions);
    unsafe { device.cmd_blit_image2(command_buffer, &blit_info) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_carries_both_scopes() {
        let barrier = ImageTransition::depth(vk::Image::null(), ImageUsage::DEPTH_ATTACHMENT, ImageUsage::COMPUTE_SAMPLED)
            .barrier();

        assert_eq!(barrier.old_layout, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);
        assert_eq!(barrier.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert!(barrier.src_stage_mask.contains(vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS));
        assert!(barrier.src_access_mask.contains(vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert_eq!(barrier.dst_stage_mask, vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert_eq!(barrier.subresource_range.aspect_mask, vk::ImageAspectFlags::DEPTH);
    }

    #[test]
    fn test_blit_region_covers_both_images() {
        let region = blit_region(
            vk::Extent2D { width: 1920, height: 1080 },
            vk::Extent2D { width: 1280, height: 720 },
        );
        assert_eq!((region.src_offsets[1].x, region.src_offsets[1].y), (1920, 1080));
        assert_eq!((region.dst_offsets[1].x, region.dst_offsets[1].y), (1280, 720));
        assert_eq!(region.dst_offsets[0].x, 0);
        assert_eq!(region.src_offsets[1].z, 1);
    }

    #[test]
    fn test_subresource_range() {
        let range = subresource_range(vk::ImageAspectFlags::COLOR, 2, 3);
        assert_eq!((range.base_mip_level, range.level_count, range.layer_count), (2, 3, 1));
    }
}
