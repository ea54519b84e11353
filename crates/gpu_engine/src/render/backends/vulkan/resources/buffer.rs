//! Buffers allocated through `vk-mem`
//!
//! [`AllocatedBuffer`] owns a buffer and its allocation; host-visible buffers
//! stay mapped for their whole lifetime. [`PushDescriptorBuffer`] adds the
//! descriptor record used to bind the buffer with push descriptors.

use std::ptr::NonNull;
use std::sync::Arc;

use ash::vk;
use bytemuck::Pod;
use vk_mem::Alloc;

use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Where a buffer's memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    /// Device-local, never mapped
    GpuOnly,
    /// Host-visible and coherent, written sequentially by the CPU
    CpuToGpu,
    /// Host-visible and coherent, read back by the CPU
    GpuToCpu,
}

impl MemoryLocation {
    fn allocation_info(self) -> vk_mem::AllocationCreateInfo {
        match self {
            Self::GpuOnly => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferDevice,
                ..Default::default()
            },
            Self::CpuToGpu => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::Auto,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
                required_flags: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                ..Default::default()
            },
            Self::GpuToCpu => vk_mem::AllocationCreateInfo {
                usage: vk_mem::MemoryUsage::AutoPreferHost,
                flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
                required_flags: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                ..Default::default()
            },
        }
    }

    /// Whether buffers in this location are mapped
    pub fn is_mapped(self) -> bool {
        self != Self::GpuOnly
    }
}

/// Buffer plus its `vk-mem` allocation, destroyed together on drop
pub struct AllocatedBuffer {
    allocator: Arc<vk_mem::Allocator>,
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    mapped: Option<NonNull<u8>>,
}

impl AllocatedBuffer {
    /// Allocate `size` bytes; host-visible locations are mapped immediately
    pub fn new(
        allocator: Arc<vk_mem::Allocator>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        what: &'static str,
    ) -> VulkanResult<Self> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size.max(1))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let (buffer, mut allocation) = unsafe {
            allocator
                .create_buffer(&buffer_info, &location.allocation_info())
                .map_err(|result| {
                    log::error!("[UPLOAD] Allocating {} ({} bytes) failed: {:?}", what, size, result);
                    VulkanError::Allocation { what, result }
                })?
        };

        let mapped = if location.is_mapped() {
            match unsafe { allocator.map_memory(&mut allocation) } {
                Ok(ptr) => NonNull::new(ptr),
                Err(result) => {
                    unsafe { allocator.destroy_buffer(buffer, &mut allocation) };
                    return Err(VulkanError::Allocation { what, result });
                }
            }
        } else {
            None
        };

        log::trace!("[UPLOAD] Allocated {} bytes for {}", size, what);

        Ok(Self {
            allocator,
            buffer,
            allocation,
            size,
            usage,
            mapped,
        })
    }

    /// Host-visible buffer holding a copy of `data`
    pub fn with_data<T: Pod>(
        allocator: Arc<vk_mem::Allocator>,
        data: &[T],
        usage: vk::BufferUsageFlags,
        what: &'static str,
    ) -> VulkanResult<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let buffer = Self::new(allocator, bytes.len() as vk::DeviceSize, usage, MemoryLocation::CpuToGpu, what)?;
        buffer.write(0, bytes)?;
        Ok(buffer)
    }

    /// Copy `bytes` into the mapped memory at `offset`
    pub fn write(&self, offset: usize, bytes: &[u8]) -> VulkanResult<()> {
        let ptr = self.mapped.ok_or_else(|| VulkanError::InvalidOperation {
            reason: "write to a buffer that is not host-visible".to_string(),
        })?;
        if offset + bytes.len() > self.size as usize {
            return Err(VulkanError::InvalidOperation {
                reason: format!("write of {} bytes at {} overflows a {}-byte buffer", bytes.len(), offset, self.size),
            });
        }

        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr().add(offset), bytes.len()) };
        Ok(())
    }

    /// Write one `Pod` value at the start of the buffer
    pub fn write_value<T: Pod>(&self, value: &T) -> VulkanResult<()> {
        self.write(0, bytemuck::bytes_of(value))
    }

    /// Copy of the whole buffer's bytes; only host-visible buffers can be read
    pub fn read_back(&self) -> VulkanResult<Vec<u8>> {
        let ptr = self.mapped.ok_or_else(|| VulkanError::InvalidOperation {
            reason: "read back of a buffer that is not host-visible".to_string(),
        })?;
        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), self.size as usize) };
        Ok(bytes.to_vec())
    }

    /// GPU address, for buffers created with `SHADER_DEVICE_ADDRESS`
    pub fn device_address(&self, device: &ash::Device) -> vk::DeviceAddress {
        let info = vk::BufferDeviceAddressInfo::builder().buffer(self.buffer);
        unsafe { device.get_buffer_device_address(&info) }
    }

    /// Raw handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Size in bytes
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Usage flags the buffer was created with
    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    /// Whether the buffer is mapped
    pub fn is_mapped(&self) -> bool {
        self.mapped.is_some()
    }
}

impl Drop for AllocatedBuffer {
    fn drop(&mut self) {
        unsafe {
            if self.mapped.take().is_some() {
                self.allocator.unmap_memory(&mut self.allocation);
            }
            self.allocator.destroy_buffer(self.buffer, &mut self.allocation);
        }
    }
}

/// A buffer together with the descriptor it is pushed as
pub struct PushDescriptorBuffer {
    buffer: AllocatedBuffer,
    binding: u32,
    descriptor_type: vk::DescriptorType,
    info: [vk::DescriptorBufferInfo; 1],
}

impl PushDescriptorBuffer {
    /// Describe `buffer` as `descriptor_type` at `binding`, covering the whole buffer
    pub fn new(buffer: AllocatedBuffer, binding: u32, descriptor_type: vk::DescriptorType) -> Self {
        let info = [vk::DescriptorBufferInfo {
            buffer: buffer.handle(),
            offset: 0,
            range: vk::WHOLE_SIZE,
        }];
        Self {
            buffer,
            binding,
            descriptor_type,
            info,
        }
    }

    /// Storage buffer binding
    pub fn storage(buffer: AllocatedBuffer, binding: u32) -> Self {
        Self::new(buffer, binding, vk::DescriptorType::STORAGE_BUFFER)
    }

    /// Uniform buffer binding
    pub fn uniform(buffer: AllocatedBuffer, binding: u32) -> Self {
        Self::new(buffer, binding, vk::DescriptorType::UNIFORM_BUFFER)
    }

    /// Write record for `vkCmdPushDescriptorSetKHR`
    ///
    /// The record points into `self` and must be consumed while `self` is alive.
    pub fn write(&self) -> vk::WriteDescriptorSet {
        vk::WriteDescriptorSet::builder()
            .dst_binding(self.binding)
            .descriptor_type(self.descriptor_type)
            .buffer_info(&self.info)
            .build()
    }

    /// Binding number
    pub fn binding(&self) -> u32 {
        self.binding
    }

    /// Descriptor type
    pub fn descriptor_type(&self) -> vk::DescriptorType {
        self.descriptor_type
    }

    /// The underlying buffer
    pub fn buffer(&self) -> &AllocatedBuffer {
        &self.buffer
    }

    /// Raw handle
    pub fn handle(&self) -> vk::Buffer {
        self.buffer.handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_host_locations_are_mapped() {
        assert!(!MemoryLocation::GpuOnly.is_mapped());
        assert!(MemoryLocation::CpuToGpu.is_mapped());
        assert!(MemoryLocation::GpuToCpu.is_mapped());
    }

    #[test]
    fn test_host_locations_require_coherent_memory() {
        for location in [MemoryLocation::CpuToGpu, MemoryLocation::GpuToCpu] {
            let info = location.allocation_info();
            assert!(info.required_flags.contains(vk::MemoryPropertyFlags::HOST_COHERENT));
        }
        let device = MemoryLocation::GpuOnly.allocation_info();
        assert!(device.required_flags.is_empty());
    }
}
