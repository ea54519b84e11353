//! Shader modules, specialization constants and pipeline objects
//!
//! Bytecode comes from a [`ShaderSource`]; this module only turns validated
//! SPIR-V words into Vulkan objects. Every wrapper destroys its handle on drop,
//! so a builder that fails halfway leaves nothing behind.

use std::ffi::CStr;

use ash::{vk, Device};

use super::pipeline_state::GraphicsPipelineDesc;
use crate::assets::ShaderSource;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Entry point of every shader in the renderer
pub const ENTRY_POINT: &CStr = match CStr::from_bytes_with_nul(b"main\0") {
    Ok(name) => name,
    Err(_) => panic!("entry point is not NUL-terminated"),
};

/// SPIR-V shader module wrapper with automatic resource management
pub struct ShaderModule {
    device: Device,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create a module from SPIR-V words
    pub fn from_words(device: &Device, words: &[u32]) -> VulkanResult<Self> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(words);

        let module = unsafe {
            device.create_shader_module(&create_info, None).map_err(|e| {
                log::error!("[SHADER] vkCreateShaderModule failed: {:?}", e);
                VulkanError::Api(e)
            })?
        };

        Ok(Self {
            device: device.clone(),
            module,
        })
    }

    /// Load `key` through `source` and create a module from it
    ///
    /// Empty or malformed bytecode fails before any Vulkan call.
    pub fn from_source(device: &Device, source: &dyn ShaderSource, key: &str) -> VulkanResult<Self> {
        let words = source.load_words(key).map_err(|e| {
            log::error!("[SHADER] Loading {} failed: {}", key, e);
            VulkanError::Asset(e)
        })?;
        log::debug!("[SHADER] {} holds {} SPIR-V words", key, words.len());
        Self::from_words(device, &words)
    }

    /// Get shader module handle
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Specialization constants for one stage
#[derive(Debug, Clone, Default)]
pub struct Specialization {
    entries: Vec<vk::SpecializationMapEntry>,
    data: Vec<u8>,
}

impl Specialization {
    /// No constants
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the `u32` constant `constant_id` to `value`
    pub fn with_u32(mut self, constant_id: u32, value: u32) -> Self {
        self.entries.push(vk::SpecializationMapEntry {
            constant_id,
            offset: self.data.len() as u32,
            size: std::mem::size_of::<u32>(),
        });
        self.data.extend_from_slice(&value.to_ne_bytes());
        self
    }

    /// Constant 0 set to 1: the fragment shader variant of the second render pass
    pub fn post_pass() -> Self {
        Self::new().with_u32(0, 1)
    }

    /// Map entries
    pub fn entries(&self) -> &[vk::SpecializationMapEntry] {
        &self.entries
    }

    /// Packed constant values
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Info pointing into `self`
    pub fn info(&self) -> vk::SpecializationInfo {
        vk::SpecializationInfo::builder()
            .map_entries(&self.entries)
            .data(&self.data)
            .build()
    }
}

/// A module bound to a pipeline stage
pub struct ShaderStage {
    module: ShaderModule,
    stage: vk::ShaderStageFlags,
    specialization: Option<(Specialization, Box<vk::SpecializationInfo>)>,
}

impl ShaderStage {
    /// Use `module` for `stage` with the `main` entry point
    pub fn new(module: ShaderModule, stage: vk::ShaderStageFlags) -> Self {
        Self {
            module,
            stage,
            specialization: None,
        }
    }

    /// Load `key` through `source` for `stage`
    pub fn load(
        device: &Device,
        source: &dyn ShaderSource,
        key: &str,
        stage: vk::ShaderStageFlags,
    ) -> VulkanResult<Self> {
        Ok(Self::new(ShaderModule::from_source(device, source, key)?, stage))
    }

    /// Attach specialization constants
    pub fn with_specialization(mut self, specialization: Specialization) -> Self {
        let info = Box::new(specialization.info());
        self.specialization = Some((specialization, info));
        self
    }

    /// Stage flag
    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }

    /// Stage create info; valid while `self` is alive
    pub fn create_info(&self) -> vk::PipelineShaderStageCreateInfo {
        let mut info = vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.stage)
            .module(self.module.handle())
            .name(ENTRY_POINT)
            .build();
        if let Some((_, specialization_info)) = &self.specialization {
            info.p_specialization_info = specialization_info.as_ref();
        }
        info
    }
}

/// Compute pipeline wrapper; the layout is owned by the caller
pub struct ComputePipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl ComputePipeline {
    /// Build a compute pipeline from `key` with `layout`
    pub fn new(
        device: &Device,
        source: &dyn ShaderSource,
        key: &str,
        layout: vk::PipelineLayout,
        specialization: Option<Specialization>,
    ) -> VulkanResult<Self> {
        let mut stage = ShaderStage::load(device, source, key, vk::ShaderStageFlags::COMPUTE)?;
        if let Some(specialization) = specialization {
            stage = stage.with_specialization(specialization);
        }

        let create_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage.create_info())
            .layout(layout);

        let pipelines = unsafe {
            device
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info.build()], None)
                .map_err(|(_, e)| {
                    log::error!("[PIPELINE] Compute pipeline {} failed: {:?}", key, e);
                    VulkanError::Api(e)
                })?
        };
        let pipeline = first_pipeline(pipelines)?;

        log::debug!("[PIPELINE] Compute pipeline {} created", key);
        Ok(Self {
            device: device.clone(),
            pipeline,
            layout,
        })
    }

    /// Bind for dispatch
    pub fn bind(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device
                .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::COMPUTE, self.pipeline)
        };
    }

    /// Get pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Layout the pipeline was built with
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
    }
}

/// Graphics pipeline wrapper with RAII cleanup; the layout is owned by the caller
pub struct GraphicsPipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Build a dynamic-rendering pipeline from `stages` and `desc`
    ///
    /// Geometry is pulled from storage buffers, so there is no vertex input.
    pub fn new(
        device: &Device,
        stages: &[&ShaderStage],
        layout: vk::PipelineLayout,
        desc: &GraphicsPipelineDesc,
    ) -> VulkanResult<Self> {
        let stage_infos: Vec<vk::PipelineShaderStageCreateInfo> = stages.iter().map(|stage| stage.create_info()).collect();
        let has_vertex_stage = stages.iter().any(|stage| stage.stage() == vk::ShaderStageFlags::VERTEX);

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder();
        let input_assembly = desc.input_assembly.to_vk();
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization = desc.rasterization.to_vk();
        let multisample = desc.multisample.to_vk();
        let depth_stencil = desc.depth_stencil.to_vk();
        let blend_attachments = [desc.color_blend.attachment()];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments);
        let dynamic_states = desc.dynamic_states.states();
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let color_formats = [desc.formats.color];
        let mut rendering = vk::PipelineRenderingCreateInfo::builder()
            .color_attachment_formats(&color_formats)
            .depth_attachment_format(desc.formats.depth);

        let mut create_info = vk::GraphicsPipelineCreateInfo::builder()
            .push_next(&mut rendering)
            .stages(&stage_infos)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layout);
        // Mesh pipelines must not provide vertex input or input assembly state
        if has_vertex_stage {
            create_info = create_info.vertex_input_state(&vertex_input).input_assembly_state(&input_assembly);
        }

        let pipelines = unsafe {
            device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info.build()], None)
                .map_err(|(_, e)| {
                    log::error!("[PIPELINE] Graphics pipeline creation failed: {:?}", e);
                    VulkanError::Api(e)
                })?
        };
        let pipeline = first_pipeline(pipelines)?;

        Ok(Self {
            device: device.clone(),
            pipeline,
            layout,
        })
    }

    /// Bind for drawing
    pub fn bind(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device
                .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, self.pipeline)
        };
    }

    /// Get pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Get layout handle
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        log::debug!("[PIPELINE] Dropping GraphicsPipeline {:?}", self.pipeline);
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
        }
    }
}

fn first_pipeline(pipelines: Vec<vk::Pipeline>) -> VulkanResult<vk::Pipeline> {
    pipelines.into_iter().next().ok_or(VulkanError::InvalidOperation {
        reason: "pipeline creation returned nothing".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_pass_specialization() {
        let spec = Specialization::post_pass();
        assert_eq!(spec.entries().len(), 1);
        assert_eq!(spec.entries()[0].constant_id, 0);
        assert_eq!(spec.entries()[0].size, 4);
        assert_eq!(spec.data(), &1u32.to_ne_bytes());

        let info = spec.info();
        assert_eq!(info.map_entry_count, 1);
        assert_eq!(info.data_size, 4);
    }

    #[test]
    fn test_constants_are_packed() {
        let spec = Specialization::new().with_u32(0, 7).with_u32(3, 9);
        assert_eq!(spec.entries()[1].offset, 4);
        assert_eq!(spec.entries()[1].constant_id, 3);
        assert_eq!(spec.data().len(), 8);
    }

    #[test]
    fn test_entry_point() {
        assert_eq!(ENTRY_POINT.to_str().unwrap(), "main");
    }
}
