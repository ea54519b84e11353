//! GPU-driven Vulkan renderer
//!
//! Owns the context and every long-lived object, and runs the frame loop:
//! wait for the slot's fence, acquire, record the culling frame (or the
//! background pass when no scene is loaded), blit to the swapchain image,
//! submit and present.

use ash::vk;

use super::rendering::commands::{begin_one_time, blit_image, ImageTransition, ImageUsage};
use super::rendering::culling::{CullingRecorder, SceneFrame};
use super::rendering::depth_pyramid::{DepthPyramid, SamplerPolicy};
use super::rendering::pipeline_layout::{
    graphics_layout, BackgroundPushConstants, ComputeLayouts, DescriptorLayouts, PipelineLayout,
};
use super::rendering::pipelines::{mesh_path_available, ComputePipelines, MainPipelines};
use super::resources::buffer::{AllocatedBuffer, MemoryLocation, PushDescriptorBuffer};
use super::resources::descriptor_set::{bindings, BindingVisibility, PushDescriptorWrites};
use super::resources::texture_table::TextureHandle;
use super::resources::upload::{ResourceManager, SceneResources};
use super::state::attachments::RenderAttachments;
use super::state::sync::{FrameRing, FrameTools};
use super::{DeviceFeatures, SurfaceProvider, VulkanContext, VulkanError, VulkanResult};
use crate::assets::{DecodedImage, ShaderSource};
use crate::core::config::RendererConfig;
use crate::render::api::{BackendResult, CameraViewData, RenderBackend, RenderContext};
use crate::render::culling::{CullFlags, CullPushConstants};
use crate::scene::SceneProvider;

/// Workgroup edge of `background.comp`
const BACKGROUND_WORKGROUP_SIZE: u32 = 16;

/// The swapchain image may be written once acquisition has signalled
const SWAPCHAIN_ACQUIRED: ImageUsage = ImageUsage {
    layout: vk::ImageLayout::UNDEFINED,
    stage: vk::PipelineStageFlags2::TRANSFER,
    access: vk::AccessFlags2::NONE,
};

/// Colour attachment before the background pass overwrites it
const COLOR_DISCARDED: ImageUsage = ImageUsage {
    layout: vk::ImageLayout::UNDEFINED,
    stage: vk::PipelineStageFlags2::TRANSFER,
    access: vk::AccessFlags2::NONE,
};

/// Per-slot tools plus the slot's view uniform
struct FrameSlot {
    tools: FrameTools,
    view_data: PushDescriptorBuffer,
}

/// Uploaded scene and the pipelines that draw it
struct LoadedScene {
    pipelines: MainPipelines,
    _layout: PipelineLayout,
    resources: SceneResources,
}

/// Flags for both culling dispatches
fn cull_flags(config: &RendererConfig, mesh_shading: bool) -> CullFlags {
    let mut flags = CullFlags::empty();
    flags.set(CullFlags::OCCLUSION, config.occlusion_culling);
    flags.set(CullFlags::MESH_SHADING, mesh_shading);
    flags.set(CullFlags::LOD, config.lod_selection);
    flags
}

/// Optional device features asked for by `config`
fn requested_features(config: &RendererConfig) -> DeviceFeatures {
    let mut features = DeviceFeatures::empty();
    features.set(DeviceFeatures::MESH_SHADING, config.mesh_shading);
    features.set(DeviceFeatures::RAY_TRACING, config.ray_tracing);
    features
}

/// Vulkan implementation of [`RenderBackend`]
///
/// Fields drop top to bottom, so everything created from the device is
/// released before the context.
pub struct VulkanRenderer {
    scene: Option<LoadedScene>,
    frames: Vec<FrameSlot>,
    pyramid: DepthPyramid,
    attachments: RenderAttachments,
    compute: ComputePipelines,
    _compute_layouts: ComputeLayouts,
    descriptor_layouts: DescriptorLayouts,
    resources: ResourceManager,
    shader_source: Box<dyn ShaderSource>,
    ring: FrameRing,
    mesh_shading: bool,
    config: RendererConfig,
    context: VulkanContext,
}

impl VulkanRenderer {
    /// Create the renderer presenting to `provider`'s surface
    ///
    /// Fails when a required shader, device feature or allocation is missing.
    pub fn new(
        provider: &mut dyn SurfaceProvider,
        config: &RendererConfig,
        shader_source: Box<dyn ShaderSource>,
    ) -> VulkanResult<Self> {
        config.validate().map_err(|e| {
            log::error!("[CONTEXT] Invalid renderer configuration: {}", e);
            VulkanError::InitializationFailed(e.to_string())
        })?;

        let context = VulkanContext::new(
            provider,
            &config.application_name,
            config.application_version,
            config.validation_enabled(),
            requested_features(config),
        )?;
        let device = context.raw_device();

        let mesh_shading = mesh_path_available(
            config.mesh_shading,
            context.capabilities().mesh_shading(),
            shader_source.as_ref(),
            &config.shaders,
        );

        let mut resources = ResourceManager::new(&context, config.texture_capacity);
        resources.ensure_ready(&context)?;
        let allocator = resources.allocator()?;

        let descriptor_layouts = DescriptorLayouts::new(&device, BindingVisibility::new(mesh_shading))?;
        let compute_layouts = ComputeLayouts::new(&device, &descriptor_layouts)?;
        let compute = ComputePipelines::new(&device, shader_source.as_ref(), &config.shaders, &compute_layouts)?;

        let extent = context.swapchain()?.extent();
        let attachments = RenderAttachments::new(&device, allocator.clone(), extent)?;
        let pyramid = DepthPyramid::new(&device, allocator.clone(), extent)?;

        let frames = (0..config.frames_in_flight)
            .map(|_| {
                let buffer = AllocatedBuffer::new(
                    allocator.clone(),
                    std::mem::size_of::<CameraViewData>() as u64,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    MemoryLocation::CpuToGpu,
                    "view data",
                )?;
                Ok(FrameSlot {
                    tools: FrameTools::new(device.clone(), context.queue_family())?,
                    view_data: PushDescriptorBuffer::uniform(buffer, bindings::VIEW_DATA),
                })
            })
            .collect::<VulkanResult<Vec<_>>>()?;

        log::info!(
            "[CONTEXT] Renderer ready on {} ({} frames in flight, {} path, ray tracing {})",
            context.physical_device().name(),
            frames.len(),
            if mesh_shading { "mesh" } else { "vertex" },
            if context.capabilities().ray_tracing() { "on" } else { "off" }
        );

        Ok(Self {
            scene: None,
            frames,
            pyramid,
            attachments,
            compute,
            _compute_layouts: compute_layouts,
            descriptor_layouts,
            resources,
            shader_source,
            ring: FrameRing::new(config.frames_in_flight),
            mesh_shading,
            config: config.clone(),
            context,
        })
    }

    /// Whether the task/mesh path is active
    pub fn mesh_shading(&self) -> bool {
        self.mesh_shading
    }

    /// The Vulkan context
    pub fn context(&self) -> &VulkanContext {
        &self.context
    }

    /// Buffers and textures of the uploaded scene
    pub fn scene_resources(&self) -> Option<&SceneResources> {
        self.scene.as_ref().map(|scene| &scene.resources)
    }

    /// Copy a buffer's contents back to the CPU; blocks until done
    pub fn read_buffer(&self, buffer: &AllocatedBuffer) -> VulkanResult<Vec<u8>> {
        self.resources.read_buffer(buffer)
    }

    fn recreate_swapchain(&mut self, extent: (u32, u32)) -> VulkanResult<()> {
        self.context.recreate_swapchain(extent)?;
        let extent = self.context.swapchain()?.extent();

        let allocator = self.resources.allocator()?;
        self.attachments = RenderAttachments::new(self.context.device(), allocator, extent)?;
        self.pyramid.recreate(extent, SamplerPolicy::Reuse)?;
        Ok(())
    }

    fn record_background(&self, command_buffer: vk::CommandBuffer) {
        let device = self.context.device();
        let color = self.attachments.color();
        let extent = self.attachments.extent();

        match &self.compute.background {
            Some(pipeline) => {
                ImageTransition::color(color.handle(), COLOR_DISCARDED, ImageUsage::COMPUTE_GENERAL)
                    .record(device, command_buffer);
                pipeline.bind(command_buffer);
                PushDescriptorWrites::new().storage_image(0, color.view()).push(
                    self.context.loaders().push_descriptor(),
                    command_buffer,
                    vk::PipelineBindPoint::COMPUTE,
                    pipeline.layout(),
                );
                let constants = BackgroundPushConstants::from_clear_color(self.config.clear_color);
                unsafe {
                    device.cmd_push_constants(
                        command_buffer,
                        pipeline.layout(),
                        vk::ShaderStageFlags::COMPUTE,
                        0,
                        bytemuck::bytes_of(&constants),
                    );
                    device.cmd_dispatch(
                        command_buffer,
                        extent.width.div_ceil(BACKGROUND_WORKGROUP_SIZE),
                        extent.height.div_ceil(BACKGROUND_WORKGROUP_SIZE),
                        1,
                    );
                }
                ImageTransition::color(color.handle(), ImageUsage::COMPUTE_GENERAL, ImageUsage::TRANSFER_SRC)
                    .record(device, command_buffer);
            }
            None => {
                ImageTransition::color(color.handle(), COLOR_DISCARDED, ImageUsage::TRANSFER_DST)
                    .record(device, command_buffer);
                let clear = vk::ClearColorValue {
                    float32: self.config.clear_color,
                };
                let range = color.desc().full_range();
                unsafe {
                    device.cmd_clear_color_image(
                        command_buffer,
                        color.handle(),
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &clear,
                        &[range],
                    )
                };
                ImageTransition::color(color.handle(), ImageUsage::TRANSFER_DST, ImageUsage::TRANSFER_SRC)
                    .record(device, command_buffer);
            }
        }
    }

    fn record_scene(
        &self,
        command_buffer: vk::CommandBuffer,
        scene: &LoadedScene,
        view_data: vk::WriteDescriptorSet,
        ctx: &RenderContext<'_>,
    ) -> VulkanResult<()> {
        let loaders = self.context.loaders();
        let mesh_shader = if self.mesh_shading {
            Some(loaders.mesh_shader()?)
        } else {
            None
        };

        let frame = SceneFrame {
            scene: &scene.resources,
            compute: &self.compute,
            main: &scene.pipelines,
            attachments: &self.attachments,
            pyramid: &self.pyramid,
            view_data,
            cull: CullPushConstants::new(
                &ctx.projection,
                ctx.z_near,
                self.pyramid.extent(),
                scene.resources.object_count(),
                cull_flags(&self.config, self.mesh_shading),
                self.config.lod_target,
            ),
            clear_color: self.config.clear_color,
            mesh_shading: self.mesh_shading,
        };
        CullingRecorder::new(self.context.device(), loaders.push_descriptor(), mesh_shader)
            .record(command_buffer, &frame)?;

        ImageTransition::color(
            self.attachments.color().handle(),
            ImageUsage::COLOR_ATTACHMENT,
            ImageUsage::TRANSFER_SRC,
        )
        .record(self.context.device(), command_buffer);
        Ok(())
    }

    /// Colour attachment (in TRANSFER_SRC) → swapchain image → PRESENT
    fn record_present_blit(&self, command_buffer: vk::CommandBuffer, image_index: u32) -> VulkanResult<()> {
        let device = self.context.device();
        let swapchain = self.context.swapchain()?;
        let target = swapchain
            .images()
            .get(image_index as usize)
            .copied()
            .ok_or(VulkanError::InvalidOperation {
                reason: format!("swapchain has no image {}", image_index),
            })?;

        ImageTransition::color(target, SWAPCHAIN_ACQUIRED, ImageUsage::TRANSFER_DST).record(device, command_buffer);
        blit_image(
            device,
            command_buffer,
            self.attachments.color().handle(),
            self.attachments.extent(),
            target,
            swapchain.extent(),
        );
        ImageTransition::color(target, ImageUsage::TRANSFER_DST, ImageUsage::PRESENT).record(device, command_buffer);
        Ok(())
    }

    fn submit(&self, slot: &FrameSlot) -> VulkanResult<()> {
        let wait = [vk::SemaphoreSubmitInfo::builder()
            .semaphore(slot.tools.image_acquired.handle())
            .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags2::TRANSFER)
            .build()];
        let signal = [vk::SemaphoreSubmitInfo::builder()
            .semaphore(slot.tools.ready_to_present.handle())
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS)
            .build()];
        let command_buffers = [vk::CommandBufferSubmitInfo::builder()
            .command_buffer(slot.tools.command_buffer)
            .build()];
        let submit = vk::SubmitInfo2::builder()
            .wait_semaphore_infos(&wait)
            .command_buffer_infos(&command_buffers)
            .signal_semaphore_infos(&signal);

        unsafe {
            self.context
                .device()
                .queue_submit2(self.context.queue(), &[submit.build()], slot.tools.in_flight.handle())
                .map_err(|e| {
                    log::error!("[FRAME] Queue submission failed: {:?}", e);
                    VulkanError::Api(e)
                })
        }
    }
}

impl RenderBackend for VulkanRenderer {
    fn swapchain_extent(&self) -> (u32, u32) {
        let extent = self.attachments.extent();
        (extent.width, extent.height)
    }

    fn upload_texture(&mut self, image: &DecodedImage) -> BackendResult<TextureHandle> {
        self.resources.upload_texture(&self.context, image)
    }

    fn upload_scene(&mut self, provider: &dyn SceneProvider) -> BackendResult<()> {
        // The previous scene may still be referenced by frames in flight
        self.context.wait_idle()?;
        self.scene = None;

        let resources = self
            .resources
            .upload_scene(&self.context, provider.scene(), self.mesh_shading)?;
        let layout = graphics_layout(
            self.context.device(),
            &self.descriptor_layouts.global,
            resources.textures.layout(),
        )?;
        let pipelines = MainPipelines::new(
            self.context.device(),
            self.shader_source.as_ref(),
            &self.config.shaders,
            layout.handle(),
            RenderAttachments::formats(),
            self.mesh_shading,
        )?;

        log::info!("[UPLOAD] Scene ready with {} render objects", resources.object_count());
        self.scene = Some(LoadedScene {
            pipelines,
            _layout: layout,
            resources,
        });
        Ok(())
    }

    fn draw_frame(&mut self, ctx: &RenderContext<'_>) -> BackendResult<()> {
        if ctx.is_minimized() {
            log::trace!("[FRAME] Window minimised, skipping frame");
            return Ok(());
        }

        let slot_index = self.ring.current();
        self.frames[slot_index].tools.in_flight.wait(u64::MAX)?;

        if ctx.window_resized {
            self.recreate_swapchain((ctx.window_width, ctx.window_height))?;
        }

        let acquired = self
            .context
            .swapchain()?
            .acquire(self.frames[slot_index].tools.image_acquired.handle())?;
        let Some((image_index, acquire_status)) = acquired else {
            log::debug!("[FRAME] Swapchain out of date at acquire");
            self.recreate_swapchain((ctx.window_width, ctx.window_height))?;
            return Ok(());
        };

        let slot = &self.frames[slot_index];
        slot.tools.in_flight.reset()?;
        slot.tools.command_pool.reset()?;
        slot.view_data.buffer().write_value(&CameraViewData::from_context(ctx))?;

        let command_buffer = slot.tools.command_buffer;
        begin_one_time(self.context.device(), command_buffer)?;
        match &self.scene {
            Some(scene) => self.record_scene(command_buffer, scene, slot.view_data.write(), ctx)?,
            None => self.record_background(command_buffer),
        }
        self.record_present_blit(command_buffer, image_index)?;
        unsafe {
            self.context
                .device()
                .end_command_buffer(command_buffer)
                .map_err(VulkanError::Api)?
        };

        self.submit(slot)?;
        let present_status = self.context.swapchain()?.present(
            self.context.queue(),
            image_index,
            slot.tools.ready_to_present.handle(),
        )?;

        self.ring.advance();

        if acquire_status.needs_recreate() || present_status.needs_recreate() {
            log::debug!("[FRAME] Swapchain {:?}/{:?}, recreating", acquire_status, present_status);
            self.recreate_swapchain((ctx.window_width, ctx.window_height))?;
        }
        Ok(())
    }

    fn wait_idle(&self) -> BackendResult<()> {
        self.context.wait_idle()
    }
}

impl Drop for VulkanRenderer {
    fn drop(&mut self) {
        if let Err(e) = self.context.wait_idle() {
            log::error!("[CONTEXT] Waiting for the device before teardown failed: {}", e);
        }
        log::debug!("[CONTEXT] Renderer dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cull_flags_follow_config() {
        let mut config = RendererConfig::new("test");
        config.occlusion_culling = true;
        config.lod_selection = false;
        assert_eq!(cull_flags(&config, false), CullFlags::OCCLUSION);
        assert_eq!(
            cull_flags(&config, true),
            CullFlags::OCCLUSION | CullFlags::MESH_SHADING
        );

        config.occlusion_culling = false;
        config.lod_selection = true;
        assert_eq!(cull_flags(&config, false), CullFlags::LOD);
    }

    #[test]
    fn test_requested_features() {
        let config = RendererConfig::new("test").with_mesh_shading(true).with_ray_tracing(false);
        assert_eq!(requested_features(&config), DeviceFeatures::MESH_SHADING);
        let config = config.with_ray_tracing(true);
        assert!(requested_features(&config).contains(DeviceFeatures::RAY_TRACING));
    }
}
