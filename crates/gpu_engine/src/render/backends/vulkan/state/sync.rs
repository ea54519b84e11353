//! Vulkan synchronization primitives for GPU/CPU coordination
//!
//! RAII semaphores and fences, the per-frame tool set and the round-robin
//! ring that selects it, plus the `synchronization2` memory barriers the
//! frame sequence is built from.
//!
//! ```text
//! Frame N:   [wait fence N%F] [record] [submit] [present]
//! Frame N+1:                  [wait fence (N+1)%F] [record] [submit] [present]
//! ```
//!
//! A slot's command pool is only reset after its fence has signalled, so a
//! command buffer is never re-recorded while the GPU may still execute it.

use ash::{vk, Device};

use crate::render::backends::vulkan::rendering::commands::CommandPool;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Memory barrier presets for the frame and upload sequences
///
/// All barriers are global `VkMemoryBarrier2`s; image layout changes go
/// through [`crate::render::backends::vulkan::rendering::commands::ImageTransition`].
pub struct MemoryBarrierBuilder;

impl MemoryBarrierBuilder {
    fn barrier(
        src_stage: vk::PipelineStageFlags2,
        src_access: vk::AccessFlags2,
        dst_stage: vk::PipelineStageFlags2,
        dst_access: vk::AccessFlags2,
    ) -> vk::MemoryBarrier2 {
        vk::MemoryBarrier2::builder()
            .src_stage_mask(src_stage)
            .src_access_mask(src_access)
            .dst_stage_mask(dst_stage)
            .dst_access_mask(dst_access)
            .build()
    }

    /// Count reset → culling atomics
    pub fn transfer_write_to_compute() -> vk::MemoryBarrier2 {
        Self::barrier(
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
        )
    }

    /// Culling output → indirect draw and geometry stages
    pub fn compute_write_to_indirect_read(mesh_shading: bool) -> vk::MemoryBarrier2 {
        let geometry = if mesh_shading {
            vk::PipelineStageFlags2::TASK_SHADER_EXT | vk::PipelineStageFlags2::MESH_SHADER_EXT
        } else {
            vk::PipelineStageFlags2::VERTEX_SHADER
        };
        Self::barrier(
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_STORAGE_WRITE,
            vk::PipelineStageFlags2::DRAW_INDIRECT | geometry,
            vk::AccessFlags2::INDIRECT_COMMAND_READ | vk::AccessFlags2::SHADER_STORAGE_READ,
        )
    }

    /// First-pass indirect reads → count reset before the late cull
    pub fn indirect_read_to_transfer_write() -> vk::MemoryBarrier2 {
        Self::barrier(
            vk::PipelineStageFlags2::DRAW_INDIRECT,
            vk::AccessFlags2::INDIRECT_COMMAND_READ,
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
        )
    }

    /// First-pass geometry reads of the draw records → late cull overwriting them
    pub fn geometry_read_to_compute_write(mesh_shading: bool) -> vk::MemoryBarrier2 {
        let geometry = if mesh_shading {
            vk::PipelineStageFlags2::TASK_SHADER_EXT | vk::PipelineStageFlags2::MESH_SHADER_EXT
        } else {
            vk::PipelineStageFlags2::VERTEX_SHADER
        };
        Self::barrier(
            vk::PipelineStageFlags2::DRAW_INDIRECT | geometry,
            vk::AccessFlags2::INDIRECT_COMMAND_READ | vk::AccessFlags2::SHADER_STORAGE_READ,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_STORAGE_WRITE,
        )
    }

    /// One pyramid level's writes → the next level's sampled reads
    pub fn compute_write_to_compute_read() -> vk::MemoryBarrier2 {
        Self::barrier(
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_STORAGE_WRITE,
            vk::PipelineStageFlags2::COMPUTE_SHADER,
            vk::AccessFlags2::SHADER_SAMPLED_READ | vk::AccessFlags2::SHADER_STORAGE_READ,
        )
    }

    /// Scene upload copies and fills → every consumer of the static buffers
    pub fn upload_to_consumers() -> vk::MemoryBarrier2 {
        Self::barrier(
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
            vk::PipelineStageFlags2::COMPUTE_SHADER
                | vk::PipelineStageFlags2::DRAW_INDIRECT
                | vk::PipelineStageFlags2::INDEX_INPUT
                | vk::PipelineStageFlags2::VERTEX_SHADER
                | vk::PipelineStageFlags2::FRAGMENT_SHADER,
            vk::AccessFlags2::SHADER_STORAGE_READ
                | vk::AccessFlags2::SHADER_STORAGE_WRITE
                | vk::AccessFlags2::INDEX_READ
                | vk::AccessFlags2::INDIRECT_COMMAND_READ,
        )
    }

    /// Transfer write → host read, for readbacks
    pub fn transfer_write_to_host_read() -> vk::MemoryBarrier2 {
        Self::barrier(
            vk::PipelineStageFlags2::TRANSFER,
            vk::AccessFlags2::TRANSFER_WRITE,
            vk::PipelineStageFlags2::HOST,
            vk::AccessFlags2::HOST_READ,
        )
    }
}

/// GPU-GPU synchronization primitive with automatic resource management
pub struct Semaphore {
    device: Device,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Create a new binary semaphore
    pub fn new(device: Device) -> VulkanResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::builder();

        let semaphore = unsafe { device.create_semaphore(&create_info, None).map_err(VulkanError::Api)? };

        Ok(Self { device, semaphore })
    }

    /// Get the semaphore handle
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Fence wrapper with RAII cleanup
pub struct Fence {
    device: Device,
    fence: vk::Fence,
}

impl Fence {
    /// Create a new fence
    pub fn new(device: Device, signaled: bool) -> VulkanResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::builder().flags(flags);

        let fence = unsafe { device.create_fence(&create_info, None).map_err(VulkanError::Api)? };

        Ok(Self { device, fence })
    }

    /// Wait for fence
    pub fn wait(&self, timeout: u64) -> VulkanResult<()> {
        unsafe {
            self.device
                .wait_for_fences(&[self.fence], true, timeout)
                .map_err(VulkanError::Api)
        }
    }

    /// Reset fence
    pub fn reset(&self) -> VulkanResult<()> {
        unsafe { self.device.reset_fences(&[self.fence]).map_err(VulkanError::Api) }
    }

    /// Get the fence handle
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Everything one frame in flight records and synchronizes with
pub struct FrameTools {
    /// Primary command buffer, allocated from `command_pool`
    pub command_buffer: vk::CommandBuffer,
    /// Pool reset at the start of every use of this slot
    pub command_pool: CommandPool,
    /// Signalled when the GPU finishes this slot's submission
    pub in_flight: Fence,
    /// Signalled by swapchain image acquisition
    pub image_acquired: Semaphore,
    /// Signalled by the submission, waited on by presentation
    pub ready_to_present: Semaphore,
}

impl FrameTools {
    /// Create the tools for one slot; the fence starts signalled
    pub fn new(device: Device, queue_family: u32) -> VulkanResult<Self> {
        let command_pool = CommandPool::new(device.clone(), queue_family, vk::CommandPoolCreateFlags::TRANSIENT)?;
        let command_buffer = command_pool.allocate_primary()?;

        Ok(Self {
            command_buffer,
            command_pool,
            in_flight: Fence::new(device.clone(), true)?,
            image_acquired: Semaphore::new(device.clone())?,
            ready_to_present: Semaphore::new(device)?,
        })
    }
}

/// Round-robin selection of frame-in-flight slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRing {
    frames_in_flight: usize,
    current: usize,
}

impl FrameRing {
    /// Ring over `frames_in_flight` slots, at least one
    pub fn new(frames_in_flight: usize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            current: 0,
        }
    }

    /// Slot used by the frame being recorded
    pub fn current(&self) -> usize {
        self.current
    }

    /// Move to the next slot
    pub fn advance(&mut self) {
        self.current = (self.current + 1) % self.frames_in_flight;
    }

    /// Number of slots
    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_wraps_around() {
        let mut ring = FrameRing::new(2);
        let slots: Vec<usize> = (0..5)
            .map(|_| {
                let slot = ring.current();
                ring.advance();
                slot
            })
            .collect();
        assert_eq!(slots, vec![0, 1, 0, 1, 0]);
    }

    #[test]
    fn test_ring_has_at_least_one_slot() {
        let mut ring = FrameRing::new(0);
        assert_eq!(ring.frames_in_flight(), 1);
        ring.advance();
        assert_eq!(ring.current(), 0);
    }

    #[test]
    fn test_indirect_barrier_targets_geometry_path() {
        let vertex = MemoryBarrierBuilder::compute_write_to_indirect_read(false);
        assert!(vertex.dst_stage_mask.contains(vk::PipelineStageFlags2::DRAW_INDIRECT));
        assert!(vertex.dst_stage_mask.contains(vk::PipelineStageFlags2::VERTEX_SHADER));
        assert!(vertex.dst_access_mask.contains(vk::AccessFlags2::INDIRECT_COMMAND_READ));

        let mesh = MemoryBarrierBuilder::compute_write_to_indirect_read(true);
        assert!(mesh.dst_stage_mask.contains(vk::PipelineStageFlags2::TASK_SHADER_EXT));
        assert!(!mesh.dst_stage_mask.contains(vk::PipelineStageFlags2::VERTEX_SHADER));
    }

    #[test]
    fn test_count_reset_waits_for_indirect_reads() {
        let war = MemoryBarrierBuilder::indirect_read_to_transfer_write();
        assert_eq!(war.src_stage_mask, vk::PipelineStageFlags2::DRAW_INDIRECT);
        assert_eq!(war.dst_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
    }
}
