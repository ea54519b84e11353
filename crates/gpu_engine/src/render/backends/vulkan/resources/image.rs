//! Images, views and samplers
//!
//! Images are allocated through `vk-mem` like buffers. Every image gets a
//! view over its whole mip chain; extra per-level views are created by the
//! owner that needs them.

use std::sync::Arc;

use ash::{vk, Device};
use vk_mem::Alloc;

use crate::assets::PixelFormat;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Vulkan format of a decoded texture
pub fn vk_format(format: PixelFormat) -> VulkanResult<vk::Format> {
    let vk_format = match format {
        PixelFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        PixelFormat::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        PixelFormat::Bc1RgbaUnorm => vk::Format::BC1_RGBA_UNORM_BLOCK,
        PixelFormat::Bc1RgbaSrgb => vk::Format::BC1_RGBA_SRGB_BLOCK,
        PixelFormat::Bc2Unorm => vk::Format::BC2_UNORM_BLOCK,
        PixelFormat::Bc2Srgb => vk::Format::BC2_SRGB_BLOCK,
        PixelFormat::Bc3Unorm => vk::Format::BC3_UNORM_BLOCK,
        PixelFormat::Bc3Srgb => vk::Format::BC3_SRGB_BLOCK,
        PixelFormat::Bc4Unorm => vk::Format::BC4_UNORM_BLOCK,
        PixelFormat::Bc4Snorm => vk::Format::BC4_SNORM_BLOCK,
        PixelFormat::Bc5Unorm => vk::Format::BC5_UNORM_BLOCK,
        PixelFormat::Bc5Snorm => vk::Format::BC5_SNORM_BLOCK,
        PixelFormat::Bc6hUfloat => vk::Format::BC6H_UFLOAT_BLOCK,
        PixelFormat::Bc6hSfloat => vk::Format::BC6H_SFLOAT_BLOCK,
        PixelFormat::Bc7Unorm => vk::Format::BC7_UNORM_BLOCK,
        PixelFormat::Bc7Srgb => vk::Format::BC7_SRGB_BLOCK,
        PixelFormat::Other(_) => return Err(VulkanError::UnsupportedFormat(format)),
    };
    Ok(vk_format)
}

/// Description of a 2D image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDesc {
    /// Width and height of level 0
    pub extent: vk::Extent2D,
    /// Texel format
    pub format: vk::Format,
    /// Usage flags
    pub usage: vk::ImageUsageFlags,
    /// Number of mip levels
    pub mip_levels: u32,
    /// Aspect of the full-chain view
    pub aspect: vk::ImageAspectFlags,
}

impl ImageDesc {
    /// Single-level colour image
    pub fn color(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            extent,
            format,
            usage,
            mip_levels: 1,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }

    /// Single-level depth image
    pub fn depth(extent: vk::Extent2D, format: vk::Format, usage: vk::ImageUsageFlags) -> Self {
        Self {
            aspect: vk::ImageAspectFlags::DEPTH,
            ..Self::color(extent, format, usage)
        }
    }

    /// Same image with `mip_levels` levels
    pub fn with_mips(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    /// Subresource range covering `level_count` levels from `base_level`
    pub fn range(&self, base_level: u32, level_count: u32) -> vk::ImageSubresourceRange {
        vk::ImageSubresourceRange {
            aspect_mask: self.aspect,
            base_mip_level: base_level,
            level_count,
            base_array_layer: 0,
            layer_count: 1,
        }
    }

    /// Subresource range covering the whole image
    pub fn full_range(&self) -> vk::ImageSubresourceRange {
        self.range(0, self.mip_levels)
    }
}

/// Image plus its allocation and full-chain view
pub struct AllocatedImage {
    device: Device,
    allocator: Arc<vk_mem::Allocator>,
    image: vk::Image,
    allocation: vk_mem::Allocation,
    view: vk::ImageView,
    desc: ImageDesc,
}

impl AllocatedImage {
    /// Allocate a device-local image and its full-chain view
    pub fn new(device: Device, allocator: Arc<vk_mem::Allocator>, desc: ImageDesc, what: &'static str) -> VulkanResult<Self> {
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(vk::Extent3D {
                width: desc.extent.width.max(1),
                height: desc.extent.height.max(1),
                depth: 1,
            })
            .mip_levels(desc.mip_levels)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let allocation_info = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let (image, mut allocation) = unsafe {
            allocator
                .create_image(&image_info, &allocation_info)
                .map_err(|result| {
                    log::error!("[UPLOAD] Allocating image {} failed: {:?}", what, result);
                    VulkanError::Allocation { what, result }
                })?
        };

        let view = match create_view(&device, image, &desc, 0, desc.mip_levels) {
            Ok(view) => view,
            Err(e) => {
                unsafe { allocator.destroy_image(image, &mut allocation) };
                return Err(e);
            }
        };

        Ok(Self {
            device,
            allocator,
            image,
            allocation,
            view,
            desc,
        })
    }

    /// View over `level_count` levels starting at `base_level`; the caller destroys it
    pub fn create_view(&self, base_level: u32, level_count: u32) -> VulkanResult<vk::ImageView> {
        create_view(&self.device, self.image, &self.desc, base_level, level_count)
    }

    /// Raw handle
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    /// View over the whole mip chain
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    /// Description the image was created with
    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    /// Level 0 extent
    pub fn extent(&self) -> vk::Extent2D {
        self.desc.extent
    }
}

impl Drop for AllocatedImage {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
            self.allocator.destroy_image(self.image, &mut self.allocation);
        }
    }
}

fn create_view(
    device: &Device,
    image: vk::Image,
    desc: &ImageDesc,
    base_level: u32,
    level_count: u32,
) -> VulkanResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(desc.format)
        .subresource_range(desc.range(base_level, level_count));

    unsafe { device.create_image_view(&create_info, None).map_err(VulkanError::Api) }
}

/// Sampler wrapper with RAII cleanup
pub struct Sampler {
    device: Device,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Trilinear, repeating sampler for material textures
    pub fn linear_repeat(device: Device, max_anisotropy: f32) -> VulkanResult<Self> {
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(max_anisotropy > 1.0)
            .max_anisotropy(max_anisotropy.max(1.0))
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);

        Self::create(device, &create_info)
    }

    /// Clamping sampler whose linear filter returns the minimum of the footprint
    pub fn min_reduction(device: Device) -> VulkanResult<Self> {
        let mut reduction = vk::SamplerReductionModeCreateInfo::builder().reduction_mode(vk::SamplerReductionMode::MIN);
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .min_lod(0.0)
            .max_lod(16.0)
            .push_next(&mut reduction);

        Self::create(device, &create_info)
    }

    fn create(device: Device, create_info: &vk::SamplerCreateInfo) -> VulkanResult<Self> {
        let sampler = unsafe { device.create_sampler(create_info, None).map_err(VulkanError::Api)? };
        Ok(Self { device, sampler })
    }

    /// Raw handle
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_mapping() {
        assert_eq!(vk_format(PixelFormat::Rgba8Srgb).unwrap(), vk::Format::R8G8B8A8_SRGB);
        assert_eq!(vk_format(PixelFormat::Bc1RgbaUnorm).unwrap(), vk::Format::BC1_RGBA_UNORM_BLOCK);
        assert_eq!(vk_format(PixelFormat::Bc7Srgb).unwrap(), vk::Format::BC7_SRGB_BLOCK);
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        assert!(matches!(
            vk_format(PixelFormat::Other(42)),
            Err(VulkanError::UnsupportedFormat(PixelFormat::Other(42)))
        ));
    }

    #[test]
    fn test_desc_ranges() {
        let desc = ImageDesc::color(
            vk::Extent2D { width: 512, height: 256 },
            vk::Format::R32_SFLOAT,
            vk::ImageUsageFlags::STORAGE,
        )
        .with_mips(9);
        let full = desc.full_range();
        assert_eq!((full.base_mip_level, full.level_count), (0, 9));
        let level = desc.range(3, 1);
        assert_eq!((level.base_mip_level, level.level_count), (3, 1));

        let depth = ImageDesc::depth(desc.extent, vk::Format::D32_SFLOAT, vk::ImageUsageFlags::SAMPLED);
        assert_eq!(depth.aspect, vk::ImageAspectFlags::DEPTH);
        assert_eq!(depth.mip_levels, 1);
    }
}
