//! Recording of the two-phase culling frame
//!
//! The frame is a fixed list of [`FrameStep`]s:
//!
//! ```text
//! reset count → initial cull → barrier → first pass (clear)
//!   → depth pyramid → reset count → late cull → barrier → second pass (load)
//! ```
//!
//! The initial cull draws what was visible last frame. The late cull tests
//! every object against the pyramid built from the first pass's depth,
//! draws the newly visible ones and rewrites the visibility buffer.

use ash::extensions::{ext, khr};
use ash::{vk, Device};

use super::commands::{pipeline_barrier, ImageTransition, ImageUsage};
use super::depth_pyramid::DepthPyramid;
use super::pipeline_state::{flipped_viewport, full_scissor};
use super::pipelines::{ComputePipelines, MainPipelines};
use super::shader::{ComputePipeline, GraphicsPipeline};
use crate::render::backends::vulkan::resources::descriptor_set::{bindings, PushDescriptorWrites};
use crate::render::backends::vulkan::resources::upload::SceneResources;
use crate::render::backends::vulkan::state::attachments::RenderAttachments;
use crate::render::backends::vulkan::state::sync::MemoryBarrierBuilder;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};
use crate::render::culling::{cull_group_count, CullPushConstants};
use crate::scene::{IndirectDrawData, IndirectTaskData};

/// Which half of the frame a cull or draw belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullPass {
    /// Objects visible last frame
    Initial,
    /// Objects revealed by the depth pyramid
    Late,
}

/// One recorded stage of a scene frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStep {
    /// Zero the draw count after the previous readers are done with it
    ResetCount,
    /// Cull dispatch filling the indirect buffers
    Cull(CullPass),
    /// Cull output made visible to indirect draws
    IndirectBarrier,
    /// Dynamic rendering pass drawing the culled commands
    Render(CullPass),
    /// Depth reduction into the pyramid
    BuildPyramid,
}

/// The steps of one scene frame, in recording order
pub const FRAME_STEPS: [FrameStep; 9] = [
    FrameStep::ResetCount,
    FrameStep::Cull(CullPass::Initial),
    FrameStep::IndirectBarrier,
    FrameStep::Render(CullPass::Initial),
    FrameStep::BuildPyramid,
    FrameStep::ResetCount,
    FrameStep::Cull(CullPass::Late),
    FrameStep::IndirectBarrier,
    FrameStep::Render(CullPass::Late),
];

/// Everything a scene frame reads
pub struct SceneFrame<'a> {
    /// Uploaded buffers and textures
    pub scene: &'a SceneResources,
    /// Culling and pyramid pipelines
    pub compute: &'a ComputePipelines,
    /// Opaque and post-pass pipelines
    pub main: &'a MainPipelines,
    /// Draw targets
    pub attachments: &'a RenderAttachments,
    /// Depth pyramid
    pub pyramid: &'a DepthPyramid,
    /// This frame's view uniform record
    pub view_data: vk::WriteDescriptorSet,
    /// Culling parameters shared by both passes
    pub cull: CullPushConstants,
    /// Clear colour of the first pass
    pub clear_color: [f32; 4],
    /// Task/mesh path instead of the vertex path
    pub mesh_shading: bool,
}

/// Records [`FRAME_STEPS`] into a command buffer
pub struct CullingRecorder<'a> {
    device: &'a Device,
    push_descriptor: &'a khr::PushDescriptor,
    mesh_shader: Option<&'a ext::MeshShader>,
}

impl<'a> CullingRecorder<'a> {
    /// Recorder using the given entry points; `mesh_shader` is needed on the mesh path
    pub fn new(
        device: &'a Device,
        push_descriptor: &'a khr::PushDescriptor,
        mesh_shader: Option<&'a ext::MeshShader>,
    ) -> Self {
        Self {
            device,
            push_descriptor,
            mesh_shader,
        }
    }

    /// Record a whole scene frame
    ///
    /// The colour attachment ends in `COLOR_ATTACHMENT_OPTIMAL` holding the
    /// final image, the depth attachment in `DEPTH_ATTACHMENT_OPTIMAL`.
    pub fn record(&self, command_buffer: vk::CommandBuffer, frame: &SceneFrame<'_>) -> VulkanResult<()> {
        if frame.mesh_shading && self.mesh_shader.is_none() {
            return Err(VulkanError::MissingCapability("VK_EXT_mesh_shader"));
        }

        for step in FRAME_STEPS {
            match step {
                FrameStep::ResetCount => self.reset_count(command_buffer, frame),
                FrameStep::Cull(pass) => self.cull(command_buffer, frame, pass),
                FrameStep::IndirectBarrier => pipeline_barrier(
                    self.device,
                    command_buffer,
                    &[MemoryBarrierBuilder::compute_write_to_indirect_read(frame.mesh_shading)],
                    &[],
                ),
                FrameStep::Render(pass) => self.render(command_buffer, frame, pass)?,
                FrameStep::BuildPyramid => self.build_pyramid(command_buffer, frame),
            }
        }
        Ok(())
    }

    fn reset_count(&self, command_buffer: vk::CommandBuffer, frame: &SceneFrame<'_>) {
        // Earlier draws still read the count and the draw records
        pipeline_barrier(
            self.device,
            command_buffer,
            &[
                MemoryBarrierBuilder::indirect_read_to_transfer_write(),
                MemoryBarrierBuilder::geometry_read_to_compute_write(frame.mesh_shading),
            ],
            &[],
        );
        let count = frame.scene.buffers.indirect_count.handle();
        unsafe {
            self.device
                .cmd_fill_buffer(command_buffer, count, 0, std::mem::size_of::<u32>() as u64, 0)
        };
        pipeline_barrier(
            self.device,
            command_buffer,
            &[MemoryBarrierBuilder::transfer_write_to_compute()],
            &[],
        );
    }

    fn cull(&self, command_buffer: vk::CommandBuffer, frame: &SceneFrame<'_>, pass: CullPass) {
        let pipeline: &ComputePipeline = match pass {
            CullPass::Initial => &frame.compute.initial_cull,
            CullPass::Late => &frame.compute.late_cull,
        };
        pipeline.bind(command_buffer);

        let mut writes = PushDescriptorWrites::new()
            .buffer(frame.view_data)
            .buffers(frame.scene.buffers.writes());
        if pass == CullPass::Late {
            writes = writes.sampled_image(
                bindings::DEPTH_PYRAMID,
                frame.pyramid.view(),
                frame.pyramid.sampler(),
                vk::ImageLayout::GENERAL,
            );
        }
        writes.push(
            self.push_descriptor,
            command_buffer,
            vk::PipelineBindPoint::COMPUTE,
            pipeline.layout(),
        );

        unsafe {
            self.device.cmd_push_constants(
                command_buffer,
                pipeline.layout(),
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(&frame.cull),
            );
            self.device
                .cmd_dispatch(command_buffer, cull_group_count(frame.cull.draw_count), 1, 1);
        }
    }

    fn render(&self, command_buffer: vk::CommandBuffer, frame: &SceneFrame<'_>, pass: CullPass) -> VulkanResult<()> {
        let color = frame.attachments.color();
        let depth = frame.attachments.depth();
        let extent = frame.attachments.extent();

        let (color_from, depth_from, load_op, pipeline): (ImageUsage, ImageUsage, vk::AttachmentLoadOp, &GraphicsPipeline) =
            match pass {
                CullPass::Initial => (
                    COLOR_RETIRED,
                    DEPTH_RETIRED,
                    vk::AttachmentLoadOp::CLEAR,
                    &frame.main.opaque,
                ),
                CullPass::Late => (
                    ImageUsage::COLOR_ATTACHMENT,
                    ImageUsage::COMPUTE_SAMPLED,
                    vk::AttachmentLoadOp::LOAD,
                    &frame.main.post_pass,
                ),
            };
        let mut transitions = vec![ImageTransition::depth(depth.handle(), depth_from, ImageUsage::DEPTH_ATTACHMENT).barrier()];
        if pass == CullPass::Initial {
            transitions.push(ImageTransition::color(color.handle(), color_from, ImageUsage::COLOR_ATTACHMENT).barrier());
        }
        pipeline_barrier(self.device, command_buffer, &[], &transitions);

        let color_attachment = vk::RenderingAttachmentInfo::builder()
            .image_view(color.view())
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(load_op)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: frame.clear_color,
                },
            })
            .build();
        // Reverse-Z: the far plane is 0
        let depth_attachment = vk::RenderingAttachmentInfo::builder()
            .image_view(depth.view())
            .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
            .load_op(load_op)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 0.0, stencil: 0 },
            })
            .build();
        let color_attachments = [color_attachment];
        let rendering_info = vk::RenderingInfo::builder()
            .render_area(full_scissor(extent))
            .layer_count(1)
            .color_attachments(&color_attachments)
            .depth_attachment(&depth_attachment);

        unsafe {
            self.device.cmd_begin_rendering(command_buffer, &rendering_info);
            self.device
                .cmd_set_viewport(command_buffer, 0, &[flipped_viewport(extent)]);
            self.device.cmd_set_scissor(command_buffer, 0, &[full_scissor(extent)]);
        }

        pipeline.bind(command_buffer);
        PushDescriptorWrites::new()
            .buffer(frame.view_data)
            .buffers(frame.scene.buffers.writes())
            .push(
                self.push_descriptor,
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout(),
            );
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.layout(),
                1,
                &[frame.scene.textures.handle()],
                &[],
            );
        }

        let buffers = &frame.scene.buffers;
        let max_draws = frame.scene.object_count();
        match (frame.mesh_shading, self.mesh_shader) {
            (true, Some(mesh_shader)) => unsafe {
                mesh_shader.cmd_draw_mesh_tasks_indirect_count(
                    command_buffer,
                    buffers.indirect_task.handle(),
                    IndirectTaskData::COMMAND_OFFSET,
                    buffers.indirect_count.handle(),
                    0,
                    max_draws,
                    IndirectTaskData::STRIDE,
                );
            },
            _ => unsafe {
                self.device
                    .cmd_bind_index_buffer(command_buffer, buffers.indices.handle(), 0, vk::IndexType::UINT32);
                self.device.cmd_draw_indexed_indirect_count(
                    command_buffer,
                    buffers.indirect_draw.handle(),
                    IndirectDrawData::COMMAND_OFFSET,
                    buffers.indirect_count.handle(),
                    0,
                    max_draws,
                    IndirectDrawData::STRIDE,
                );
            },
        }

        unsafe { self.device.cmd_end_rendering(command_buffer) };
        Ok(())
    }

    fn build_pyramid(&self, command_buffer: vk::CommandBuffer, frame: &SceneFrame<'_>) {
        ImageTransition::depth(
            frame.attachments.depth().handle(),
            ImageUsage::DEPTH_ATTACHMENT,
            ImageUsage::COMPUTE_SAMPLED,
        )
        .record(self.device, command_buffer);

        frame.pyramid.record_generation(
            self.push_descriptor,
            command_buffer,
            &frame.compute.depth_pyramid,
            frame.attachments.depth().view(),
        );
    }
}

/// Colour attachment at frame start: last frame's blit must be done reading it
const COLOR_RETIRED: ImageUsage = ImageUsage {
    layout: vk::ImageLayout::UNDEFINED,
    stage: vk::PipelineStageFlags2::TRANSFER,
    access: vk::AccessFlags2::NONE,
};

/// Depth attachment at frame start: last frame's tests must be done with it
const DEPTH_RETIRED: ImageUsage = ImageUsage {
    layout: vk::ImageLayout::UNDEFINED,
    stage: vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS,
    access: vk::AccessFlags2::NONE,
};

#[cfg(test)]
mod tests {
    use super::*;

    fn position(step: FrameStep) -> Vec<usize> {
        FRAME_STEPS
            .iter()
            .enumerate()
            .filter(|(_, s)| **s == step)
            .map(|(i, _)| i)
            .collect()
    }

    #[test]
    fn test_every_cull_follows_a_count_reset() {
        for (i, step) in FRAME_STEPS.iter().enumerate() {
            if let FrameStep::Cull(_) = step {
                assert_eq!(FRAME_STEPS[i - 1], FrameStep::ResetCount);
            }
        }
        assert_eq!(position(FrameStep::ResetCount).len(), 2);
    }

    #[test]
    fn test_every_render_follows_an_indirect_barrier() {
        for (i, step) in FRAME_STEPS.iter().enumerate() {
            if let FrameStep::Render(pass) = step {
                assert_eq!(FRAME_STEPS[i - 1], FrameStep::IndirectBarrier);
                assert_eq!(FRAME_STEPS[i - 2], FrameStep::Cull(*pass));
            }
        }
    }

    #[test]
    fn test_pyramid_sits_between_the_passes() {
        let pyramid = position(FrameStep::BuildPyramid)[0];
        assert!(position(FrameStep::Render(CullPass::Initial))[0] < pyramid);
        assert!(pyramid < position(FrameStep::Cull(CullPass::Late))[0]);
        assert_eq!(FRAME_STEPS.last(), Some(&FrameStep::Render(CullPass::Late)));
    }
}
