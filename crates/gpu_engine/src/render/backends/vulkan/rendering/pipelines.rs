//! The renderer's pipelines
//!
//! Compute pipelines are built once with the renderer. The two graphics
//! pipelines need the texture layout and are rebuilt with every scene upload.

use ash::{vk, Device};

use super::pipeline_layout::ComputeLayouts;
use super::pipeline_state::{AttachmentFormats, GraphicsPipelineDesc};
use super::shader::{ComputePipeline, GraphicsPipeline, ShaderStage, Specialization};
use crate::assets::ShaderSource;
use crate::core::config::ShaderConfig;
use crate::render::backends::vulkan::VulkanResult;

/// Whether the mesh shading path can run
///
/// Needs the request, device support, and loadable task and mesh bytecode.
/// Anything missing falls back to the vertex path with a warning.
pub fn mesh_path_available(
    requested: bool,
    supported: bool,
    source: &dyn ShaderSource,
    shaders: &ShaderConfig,
) -> bool {
    if !requested {
        return false;
    }
    if !supported {
        log::warn!("[PIPELINE] Mesh shading requested but not supported, using the vertex path");
        return false;
    }
    for key in [&shaders.task, &shaders.mesh] {
        if let Err(e) = source.load_words(key) {
            log::warn!("[PIPELINE] {} unavailable ({}), using the vertex path", key, e);
            return false;
        }
    }
    true
}

/// Opaque pipeline and its post-pass variant
pub struct MainPipelines {
    /// First render pass
    pub opaque: GraphicsPipeline,
    /// Second render pass, fragment shader specialized with constant 0 = 1
    pub post_pass: GraphicsPipeline,
}

impl MainPipelines {
    /// Build both pipelines with `layout` for the active geometry path
    pub fn new(
        device: &Device,
        source: &dyn ShaderSource,
        shaders: &ShaderConfig,
        layout: vk::PipelineLayout,
        formats: AttachmentFormats,
        mesh_shading: bool,
    ) -> VulkanResult<Self> {
        let desc = GraphicsPipelineDesc::opaque(formats);

        let geometry_stages = if mesh_shading {
            vec![
                ShaderStage::load(device, source, &shaders.task, vk::ShaderStageFlags::TASK_EXT)?,
                ShaderStage::load(device, source, &shaders.mesh, vk::ShaderStageFlags::MESH_EXT)?,
            ]
        } else {
            vec![ShaderStage::load(device, source, &shaders.vertex, vk::ShaderStageFlags::VERTEX)?]
        };
        let fragment = ShaderStage::load(device, source, &shaders.fragment, vk::ShaderStageFlags::FRAGMENT)?;
        let post_fragment = ShaderStage::load(device, source, &shaders.fragment, vk::ShaderStageFlags::FRAGMENT)?
            .with_specialization(Specialization::post_pass());

        let mut stages: Vec<&ShaderStage> = geometry_stages.iter().collect();
        stages.push(&fragment);
        let opaque = GraphicsPipeline::new(device, &stages, layout, &desc)?;

        stages.pop();
        stages.push(&post_fragment);
        let post_pass = GraphicsPipeline::new(device, &stages, layout, &desc)?;

        log::info!(
            "[PIPELINE] Main pipelines created ({} path)",
            if mesh_shading { "mesh" } else { "vertex" }
        );
        Ok(Self { opaque, post_pass })
    }
}

/// Compute pipelines created at renderer start
pub struct ComputePipelines {
    /// Culls objects visible last frame
    pub initial_cull: ComputePipeline,
    /// Culls against the depth pyramid and updates visibility
    pub late_cull: ComputePipeline,
    /// Reduces depth into the pyramid, one level per dispatch
    pub depth_pyramid: ComputePipeline,
    /// Fills the colour attachment when no scene is loaded
    pub background: Option<ComputePipeline>,
}

impl ComputePipelines {
    /// Build every compute pipeline; only the background one may be missing
    pub fn new(
        device: &Device,
        source: &dyn ShaderSource,
        shaders: &ShaderConfig,
        layouts: &ComputeLayouts,
    ) -> VulkanResult<Self> {
        let initial_cull = ComputePipeline::new(device, source, &shaders.initial_cull, layouts.cull.handle(), None)?;
        let late_cull = ComputePipeline::new(device, source, &shaders.late_cull, layouts.cull.handle(), None)?;
        let depth_pyramid = ComputePipeline::new(device, source, &shaders.depth_pyramid, layouts.pyramid.handle(), None)?;

        let background =
            match ComputePipeline::new(device, source, &shaders.background, layouts.background.handle(), None) {
                Ok(pipeline) => Some(pipeline),
                Err(e) => {
                    log::warn!("[PIPELINE] Background shader unavailable: {}", e);
                    None
                }
            };

        Ok(Self {
            initial_cull,
            late_cull,
            depth_pyramid,
            background,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::MemoryShaderSource;

    fn module_bytes() -> Vec<u8> {
        [0x0723_0203u32, 0x0001_0600, 0, 1, 0]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect()
    }

    fn shaders() -> ShaderConfig {
        ShaderConfig::new("shaders")
    }

    #[test]
    fn test_mesh_path_needs_request_and_support() {
        let mut source = MemoryShaderSource::new();
        source.insert(shaders().task, module_bytes());
        source.insert(shaders().mesh, module_bytes());

        assert!(mesh_path_available(true, true, &source, &shaders()));
        assert!(!mesh_path_available(false, true, &source, &shaders()));
        assert!(!mesh_path_available(true, false, &source, &shaders()));
    }

    #[test]
    fn test_missing_mesh_bytecode_falls_back() {
        let mut source = MemoryShaderSource::new();
        source.insert(shaders().task, module_bytes());
        assert!(!mesh_path_available(true, true, &source, &shaders()));

        source.insert(shaders().mesh, Vec::new());
        assert!(!mesh_path_available(true, true, &source, &shaders()));
    }
}
