//! Scene and texture uploads
//!
//! [`ResourceManager`] owns the memory allocator, the shared texture sampler,
//! the upload command pool and the texture table. All of them are created on
//! first use by [`ResourceManager::ensure_ready`].
//!
//! A scene upload goes through three steps:
//!
//! 1. [`ScenePlan`] validates the scene and sizes every buffer without
//!    touching the GPU,
//! 2. the CPU arrays are written into mapped staging buffers and copied into
//!    device-local buffers by a single one-time submission that also
//!    zero-fills the visibility and count buffers,
//! 3. the bindless texture set is allocated and written once.
//!
//! Staging buffers are dropped when the upload returns.

use std::sync::Arc;

use ash::{vk, Device};
use bytemuck::Pod;

use super::acceleration::BottomLevelStructures;
use super::buffer::{AllocatedBuffer, MemoryLocation, PushDescriptorBuffer};
use super::descriptor_set::{bindings, write_texture_array, DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder};
use super::image::{vk_format, AllocatedImage, ImageDesc, Sampler};
use super::texture_table::{TextureHandle, TextureTable};
use crate::assets::{image_loader::mip_extents, DecodedImage};
use crate::render::backends::vulkan::rendering::commands::{pipeline_barrier, CommandPool, ImageTransition, ImageUsage};
use crate::render::backends::vulkan::state::sync::MemoryBarrierBuilder;
use crate::render::backends::vulkan::{VulkanContext, VulkanError, VulkanResult};
use crate::scene::{SceneData, ScenePlan};

/// Device-local buffers that live as long as the uploaded scene
pub struct StaticBuffers {
    /// Vertices (binding 1)
    pub vertices: PushDescriptorBuffer,
    /// Triangle-list indices, bound as the index buffer
    pub indices: AllocatedBuffer,
    /// Render objects (binding 3)
    pub render_objects: PushDescriptorBuffer,
    /// Transforms (binding 4)
    pub transforms: PushDescriptorBuffer,
    /// Materials (binding 5)
    pub materials: PushDescriptorBuffer,
    /// Indirect draw records (binding 6)
    pub indirect_draw: PushDescriptorBuffer,
    /// Draw count (binding 7)
    pub indirect_count: PushDescriptorBuffer,
    /// Per-object visibility (binding 8)
    pub visibility: PushDescriptorBuffer,
    /// Surfaces (binding 9)
    pub surfaces: PushDescriptorBuffer,
    /// Meshlets (binding 10), absent when the scene has none
    pub meshlets: Option<PushDescriptorBuffer>,
    /// Meshlet data (binding 11), absent when the scene has none
    pub meshlet_data: Option<PushDescriptorBuffer>,
    /// Indirect task records (binding 12)
    pub indirect_task: PushDescriptorBuffer,
}

impl StaticBuffers {
    /// Push-descriptor records of every scene buffer
    pub fn writes(&self) -> Vec<vk::WriteDescriptorSet> {
        let mut writes = vec![
            self.vertices.write(),
            self.render_objects.write(),
            self.transforms.write(),
            self.materials.write(),
            self.indirect_draw.write(),
            self.indirect_count.write(),
            self.visibility.write(),
            self.surfaces.write(),
        ];
        writes.extend(self.meshlets.iter().chain(&self.meshlet_data).map(PushDescriptorBuffer::write));
        writes.push(self.indirect_task.write());
        writes
    }
}

/// The bindless texture set: layout, pool and the one allocated set
pub struct TextureSet {
    layout: DescriptorSetLayout,
    _pool: DescriptorPool,
    set: vk::DescriptorSet,
    count: u32,
}

impl TextureSet {
    /// Layout of set 1 in the graphics pipelines
    pub fn layout(&self) -> &DescriptorSetLayout {
        &self.layout
    }

    /// The descriptor set
    pub fn handle(&self) -> vk::DescriptorSet {
        self.set
    }

    /// Number of textures in the set
    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Everything a scene upload produces
pub struct SceneResources {
    /// Validated sizes and counts
    pub plan: ScenePlan,
    /// Persistent buffers
    pub buffers: StaticBuffers,
    /// Bindless textures
    pub textures: TextureSet,
    /// Acceleration structures, when ray tracing is enabled
    pub acceleration: Option<BottomLevelStructures>,
}

impl SceneResources {
    /// Number of render objects, also the maximum draw count
    pub fn object_count(&self) -> u32 {
        self.plan.object_count
    }
}

/// State created on first use
struct Ready {
    allocator: Arc<vk_mem::Allocator>,
    sampler: Sampler,
    upload_pool: CommandPool,
}

/// Owner of GPU memory, the texture table and one-shot uploads
pub struct ResourceManager {
    // Textures and the pool drop before the allocator they came from
    textures: TextureTable<AllocatedImage>,
    ready: Option<Ready>,
    device: Device,
    queue: vk::Queue,
    texture_capacity: u32,
}

impl ResourceManager {
    /// Manager for `ctx`'s device; nothing is allocated yet
    pub fn new(ctx: &VulkanContext, texture_capacity: u32) -> Self {
        Self {
            textures: TextureTable::new(texture_capacity),
            ready: None,
            device: ctx.raw_device(),
            queue: ctx.queue(),
            texture_capacity,
        }
    }

    /// Create the allocator, texture sampler and upload pool if not done yet
    pub fn ensure_ready(&mut self, ctx: &VulkanContext) -> VulkanResult<()> {
        if self.ready.is_some() {
            return Ok(());
        }

        let mut flags = vk_mem::AllocatorCreateFlags::empty();
        if ctx.capabilities().ray_tracing() {
            flags |= vk_mem::AllocatorCreateFlags::BUFFER_DEVICE_ADDRESS;
        }
        let create_info = vk_mem::AllocatorCreateInfo::new(ctx.instance(), ctx.device(), ctx.physical_device().device)
            .vulkan_api_version(vk::API_VERSION_1_3)
            .flags(flags);
        let allocator = vk_mem::Allocator::new(create_info).map_err(|result| {
            log::error!("[UPLOAD] Creating the memory allocator failed: {:?}", result);
            VulkanError::Allocation { what: "memory allocator", result }
        })?;

        let max_anisotropy = ctx.physical_device().properties.limits.max_sampler_anisotropy;
        let sampler = Sampler::linear_repeat(self.device.clone(), max_anisotropy.min(16.0))?;
        let upload_pool = CommandPool::new(self.device.clone(), ctx.queue_family(), vk::CommandPoolCreateFlags::TRANSIENT)?;

        log::debug!("[UPLOAD] Resource management ready");
        self.ready = Some(Ready {
            allocator: Arc::new(allocator),
            sampler,
            upload_pool,
        });
        Ok(())
    }

    fn ready(&self) -> VulkanResult<&Ready> {
        self.ready.as_ref().ok_or(VulkanError::InvalidOperation {
            reason: "resource manager used before ensure_ready".to_string(),
        })
    }

    /// The shared memory allocator
    pub fn allocator(&self) -> VulkanResult<Arc<vk_mem::Allocator>> {
        Ok(self.ready()?.allocator.clone())
    }

    /// Number of uploaded textures
    pub fn texture_count(&self) -> u32 {
        self.textures.len()
    }

    /// Run `record` in a one-time command buffer and wait for completion
    pub fn one_time_submit<F>(&self, record: F) -> VulkanResult<()>
    where
        F: FnOnce(vk::CommandBuffer) -> VulkanResult<()>,
    {
        self.ready()?.upload_pool.one_time_submit(self.queue, record)
    }

    /// Upload a decoded image with all its mip levels into the texture table
    pub fn upload_texture(&mut self, ctx: &VulkanContext, image: &DecodedImage) -> VulkanResult<TextureHandle> {
        self.ensure_ready(ctx)?;
        if self.textures.len() >= self.texture_capacity {
            return Err(VulkanError::TextureTableFull {
                capacity: self.texture_capacity,
            });
        }

        let format = vk_format(image.format)?;
        let levels = image.level_ranges();
        let expected: usize = levels.iter().map(|&(_, size)| size).sum();
        if image.data.len() < expected {
            return Err(VulkanError::InvalidOperation {
                reason: format!(
                    "texture data has {} bytes, {} mip levels need {}",
                    image.data.len(),
                    image.mip_levels,
                    expected
                ),
            });
        }

        let ready = self.ready()?;
        let staging = AllocatedBuffer::with_data(
            ready.allocator.clone(),
            &image.data[..expected],
            vk::BufferUsageFlags::TRANSFER_SRC,
            "texture staging",
        )?;

        let desc = ImageDesc::color(
            vk::Extent2D {
                width: image.width,
                height: image.height,
            },
            format,
            vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
        )
        .with_mips(image.mip_levels);
        let texture = AllocatedImage::new(self.device.clone(), ready.allocator.clone(), desc, "texture")?;

        let regions: Vec<vk::BufferImageCopy> = levels
            .iter()
            .zip(mip_extents(image.width, image.height, image.mip_levels))
            .enumerate()
            .map(|(level, (&(offset, _), (width, height)))| vk::BufferImageCopy {
                buffer_offset: offset as u64,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: level as u32,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D::default(),
                image_extent: vk::Extent3D { width, height, depth: 1 },
            })
            .collect();

        let range = desc.full_range();
        self.one_time_submit(|command_buffer| {
            ImageTransition::new(texture.handle(), range, ImageUsage::UNDEFINED, ImageUsage::TRANSFER_DST)
                .record(&self.device, command_buffer);
            unsafe {
                self.device.cmd_copy_buffer_to_image(
                    command_buffer,
                    staging.handle(),
                    texture.handle(),
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &regions,
                );
            }
            ImageTransition::new(texture.handle(), range, ImageUsage::TRANSFER_DST, ImageUsage::FRAGMENT_SAMPLED)
                .record(&self.device, command_buffer);
            Ok(())
        })?;

        log::debug!(
            "[UPLOAD] Texture {}x{} {:?} with {} mip level(s)",
            image.width,
            image.height,
            format,
            image.mip_levels
        );

        self.textures.push(texture).map_err(|_| VulkanError::TextureTableFull {
            capacity: self.texture_capacity,
        })
    }

    /// Upload a whole scene into fresh persistent buffers
    pub fn upload_scene(&mut self, ctx: &VulkanContext, scene: &SceneData, mesh_shading: bool) -> VulkanResult<SceneResources> {
        self.ensure_ready(ctx)?;
        let plan = ScenePlan::new(scene, mesh_shading, self.textures.len())?;
        let ray_tracing = ctx.capabilities().ray_tracing();

        let ready = self.ready()?;
        let mut uploader = StagedUpload::new(ready.allocator.clone());

        let geometry_usage = if ray_tracing {
            vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
        } else {
            vk::BufferUsageFlags::empty()
        };

        let vertices = uploader.upload(&scene.vertices, geometry_usage, "vertices")?;
        let indices = uploader.upload(&scene.indices, geometry_usage | vk::BufferUsageFlags::INDEX_BUFFER, "indices")?;
        let render_objects = uploader.upload(&scene.render_objects, vk::BufferUsageFlags::empty(), "render objects")?;
        let transforms = uploader.upload(&scene.transforms, vk::BufferUsageFlags::empty(), "transforms")?;
        let materials = uploader.upload(&scene.materials, vk::BufferUsageFlags::empty(), "materials")?;
        let surfaces = uploader.upload(&scene.surfaces, vk::BufferUsageFlags::empty(), "surfaces")?;
        let meshlets = if scene.meshlets.is_empty() {
            None
        } else {
            Some(uploader.upload(&scene.meshlets, vk::BufferUsageFlags::empty(), "meshlets")?)
        };
        let meshlet_data = if scene.meshlet_data.is_empty() {
            None
        } else {
            Some(uploader.upload(&scene.meshlet_data, vk::BufferUsageFlags::empty(), "meshlet data")?)
        };

        let sizes = plan.sizes;
        let gpu_written = |size: u64, usage: vk::BufferUsageFlags, what: &'static str| {
            device_local(
                &ready.allocator,
                size,
                usage | vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                what,
            )
        };
        let indirect_draw = gpu_written(sizes.indirect_draw, vk::BufferUsageFlags::INDIRECT_BUFFER, "indirect draws")?;
        let indirect_task = gpu_written(sizes.indirect_task, vk::BufferUsageFlags::INDIRECT_BUFFER, "indirect tasks")?;
        let indirect_count = gpu_written(sizes.indirect_count, vk::BufferUsageFlags::INDIRECT_BUFFER, "indirect count")?;
        let visibility = gpu_written(sizes.visibility, vk::BufferUsageFlags::empty(), "visibility")?;

        let copies = uploader.copies();
        self.one_time_submit(|command_buffer| {
            unsafe {
                for (staging, destination) in &copies {
                    let region = vk::BufferCopy {
                        src_offset: 0,
                        dst_offset: 0,
                        size: staging.size(),
                    };
                    self.device
                        .cmd_copy_buffer(command_buffer, staging.handle(), *destination, &[region]);
                }
                self.device
                    .cmd_fill_buffer(command_buffer, visibility.handle(), 0, vk::WHOLE_SIZE, 0);
                self.device
                    .cmd_fill_buffer(command_buffer, indirect_count.handle(), 0, vk::WHOLE_SIZE, 0);
            }
            pipeline_barrier(&self.device, command_buffer, &[MemoryBarrierBuilder::upload_to_consumers()], &[]);
            Ok(())
        })?;
        drop(copies);
        let mut staged = uploader.finish();

        let mut take = |what: &'static str| {
            staged.remove(what).ok_or(VulkanError::InvalidOperation {
                reason: format!("{} missing from upload", what),
            })
        };
        let vertices_buffer = take(vertices)?;
        let indices_buffer = take(indices)?;

        let acceleration = if ray_tracing {
            Some(BottomLevelStructures::build(
                &self.device,
                &ready.allocator,
                ctx.loaders().acceleration_structure()?,
                &ready.upload_pool,
                self.queue,
                scene,
                &vertices_buffer,
                &indices_buffer,
            )?)
        } else {
            None
        };

        let buffers = StaticBuffers {
            vertices: PushDescriptorBuffer::storage(vertices_buffer, bindings::VERTICES),
            indices: indices_buffer,
            render_objects: PushDescriptorBuffer::storage(take(render_objects)?, bindings::RENDER_OBJECTS),
            transforms: PushDescriptorBuffer::storage(take(transforms)?, bindings::TRANSFORMS),
            materials: PushDescriptorBuffer::storage(take(materials)?, bindings::MATERIALS),
            indirect_draw: PushDescriptorBuffer::storage(indirect_draw, bindings::INDIRECT_DRAW),
            indirect_count: PushDescriptorBuffer::storage(indirect_count, bindings::INDIRECT_COUNT),
            visibility: PushDescriptorBuffer::storage(visibility, bindings::VISIBILITY),
            surfaces: PushDescriptorBuffer::storage(take(surfaces)?, bindings::SURFACES),
            meshlets: meshlets
                .map(|key| take(key).map(|buffer| PushDescriptorBuffer::storage(buffer, bindings::MESHLETS)))
                .transpose()?,
            meshlet_data: meshlet_data
                .map(|key| take(key).map(|buffer| PushDescriptorBuffer::storage(buffer, bindings::MESHLET_DATA)))
                .transpose()?,
            indirect_task: PushDescriptorBuffer::storage(indirect_task, bindings::INDIRECT_TASK),
        };

        let textures = self.create_texture_set()?;

        log::info!(
            "[UPLOAD] Scene uploaded: {} objects, {} surfaces, {} vertices, {} indices, {} textures",
            plan.object_count,
            scene.surfaces.len(),
            scene.vertices.len(),
            scene.indices.len(),
            textures.count()
        );

        Ok(SceneResources {
            plan,
            buffers,
            textures,
            acceleration,
        })
    }

    fn create_texture_set(&self) -> VulkanResult<TextureSet> {
        let ready = self.ready()?;
        let count = self.textures.len();
        let layout = texture_set_layout(&self.device, count)?;
        let pool = DescriptorPool::for_textures(self.device.clone(), count)?;
        let set = pool.allocate(layout.handle())?;

        let entries: Vec<(vk::ImageView, vk::Sampler)> = self
            .textures
            .iter()
            .map(|texture| (texture.view(), ready.sampler.handle()))
            .collect();
        write_texture_array(&self.device, set, 0, &entries);

        Ok(TextureSet {
            layout,
            _pool: pool,
            set,
            count,
        })
    }

    /// Copy of a device-local buffer's contents
    ///
    /// `buffer` needs `TRANSFER_SRC` usage. Blocks until the copy finishes.
    pub fn read_buffer(&self, buffer: &AllocatedBuffer) -> VulkanResult<Vec<u8>> {
        if buffer.is_mapped() {
            return buffer.read_back();
        }
        let readback = AllocatedBuffer::new(
            self.ready()?.allocator.clone(),
            buffer.size(),
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            "readback",
        )?;

        self.one_time_submit(|command_buffer| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: buffer.size(),
            };
            unsafe {
                self.device
                    .cmd_copy_buffer(command_buffer, buffer.handle(), readback.handle(), &[region]);
            }
            pipeline_barrier(&self.device, command_buffer, &[MemoryBarrierBuilder::transfer_write_to_host_read()], &[]);
            Ok(())
        })?;

        readback.read_back()
    }
}

/// Layout of the bindless texture set: `count` combined image samplers at binding 0
pub fn texture_set_layout(device: &Device, count: u32) -> VulkanResult<DescriptorSetLayout> {
    DescriptorSetLayoutBuilder::new()
        .add_binding(0, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, count, vk::ShaderStageFlags::FRAGMENT)
        .build(device)
}

fn device_local(
    allocator: &Arc<vk_mem::Allocator>,
    size: u64,
    usage: vk::BufferUsageFlags,
    what: &'static str,
) -> VulkanResult<AllocatedBuffer> {
    AllocatedBuffer::new(
        allocator.clone(),
        size,
        usage | vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::GpuOnly,
        what,
    )
}

/// Staging buffers paired with the device-local buffers they fill
struct StagedUpload {
    allocator: Arc<vk_mem::Allocator>,
    staged: Vec<(&'static str, AllocatedBuffer, AllocatedBuffer)>,
}

impl StagedUpload {
    fn new(allocator: Arc<vk_mem::Allocator>) -> Self {
        Self {
            allocator,
            staged: Vec::new(),
        }
    }

    /// Stage `data` for a device-local storage buffer; returns the key to take it back
    fn upload<T: Pod>(&mut self, data: &[T], usage: vk::BufferUsageFlags, what: &'static str) -> VulkanResult<&'static str> {
        let staging = AllocatedBuffer::with_data(self.allocator.clone(), data, vk::BufferUsageFlags::TRANSFER_SRC, what)?;
        let destination = device_local(
            &self.allocator,
            staging.size(),
            usage | vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            what,
        )?;
        self.staged.push((what, staging, destination));
        Ok(what)
    }

    /// Staging buffers and destination handles to copy between
    fn copies(&self) -> Vec<(&AllocatedBuffer, vk::Buffer)> {
        self.staged
            .iter()
            .map(|(_, staging, destination)| (staging, destination.handle()))
            .collect()
    }

    /// Drop the staging buffers and hand out the destinations by key
    fn finish(self) -> std::collections::HashMap<&'static str, AllocatedBuffer> {
        self.staged
            .into_iter()
            .map(|(what, _staging, destination)| (what, destination))
            .collect()
    }
}
