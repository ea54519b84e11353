//! Fixed-function pipeline state as plain values
//!
//! Each fragment is `Copy + PartialEq` and converts to its `ash` create info
//! with `to_vk()`, so identical descriptions always produce identical state.

use ash::vk;

/// Primitive assembly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputAssembly {
    /// Primitive topology
    pub topology: vk::PrimitiveTopology,
    /// Whether a special index restarts strips
    pub primitive_restart: bool,
}

impl InputAssembly {
    /// Indexed triangle lists
    pub fn triangle_list() -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            primitive_restart: false,
        }
    }

    /// Create info for this state
    pub fn to_vk(&self) -> vk::PipelineInputAssemblyStateCreateInfo {
        vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(self.topology)
            .primitive_restart_enable(self.primitive_restart)
            .build()
    }
}

/// Rasterizer settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizationState {
    /// Fill, line or point
    pub polygon_mode: vk::PolygonMode,
    /// Faces to discard
    pub cull_mode: vk::CullModeFlags,
    /// Winding of front faces
    pub front_face: vk::FrontFace,
    /// Line width, 1.0 unless wide lines are enabled
    pub line_width: f32,
}

impl RasterizationState {
    /// Filled triangles, both faces drawn, counter-clockwise front
    pub fn fill() -> Self {
        Self {
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
        }
    }

    /// Same state discarding `cull_mode` faces
    pub fn with_cull_mode(mut self, cull_mode: vk::CullModeFlags) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    /// Create info for this state
    pub fn to_vk(&self) -> vk::PipelineRasterizationStateCreateInfo {
        vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.polygon_mode)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .depth_bias_enable(false)
            .line_width(self.line_width)
            .build()
    }
}

/// Multisampling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultisampleState {
    /// Samples per pixel
    pub samples: vk::SampleCountFlags,
}

impl MultisampleState {
    /// One sample, no sample shading
    pub fn disabled() -> Self {
        Self {
            samples: vk::SampleCountFlags::TYPE_1,
        }
    }

    /// Create info for this state
    pub fn to_vk(&self) -> vk::PipelineMultisampleStateCreateInfo {
        vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(self.samples)
            .sample_shading_enable(false)
            .min_sample_shading(1.0)
            .alpha_to_coverage_enable(false)
            .alpha_to_one_enable(false)
            .build()
    }
}

/// Depth test and write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthStencilState {
    /// Whether fragments are tested
    pub test: bool,
    /// Whether passing fragments write depth
    pub write: bool,
    /// Comparison against the stored depth
    pub compare_op: vk::CompareOp,
}

impl DepthStencilState {
    /// Test and write with reverse-Z: nearer fragments have larger depth
    pub fn reverse_z() -> Self {
        Self {
            test: true,
            write: true,
            compare_op: vk::CompareOp::GREATER_OR_EQUAL,
        }
    }

    /// Create info for this state; stencil and depth bounds are off
    pub fn to_vk(&self) -> vk::PipelineDepthStencilStateCreateInfo {
        vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(self.test)
            .depth_write_enable(self.write)
            .depth_compare_op(self.compare_op)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false)
            .min_depth_bounds(0.0)
            .max_depth_bounds(1.0)
            .build()
    }
}

/// Blending of the single colour attachment
///
/// The factors and ops are configured even while blending is disabled, so
/// turning `enabled` on gives constant-alpha blending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorBlendState {
    /// Channels written
    pub write_mask: vk::ColorComponentFlags,
    /// Whether blending is applied
    pub enabled: bool,
    /// Colour blend op
    pub color_op: vk::BlendOp,
    /// Alpha blend op
    pub alpha_op: vk::BlendOp,
    /// Source colour factor
    pub src_color: vk::BlendFactor,
    /// Destination colour factor
    pub dst_color: vk::BlendFactor,
    /// Source alpha factor
    pub src_alpha: vk::BlendFactor,
    /// Destination alpha factor
    pub dst_alpha: vk::BlendFactor,
}

impl ColorBlendState {
    /// Write RGBA, blending off
    pub fn opaque() -> Self {
        Self {
            write_mask: vk::ColorComponentFlags::RGBA,
            enabled: false,
            color_op: vk::BlendOp::ADD,
            alpha_op: vk::BlendOp::ADD,
            src_color: vk::BlendFactor::CONSTANT_ALPHA,
            dst_color: vk::BlendFactor::CONSTANT_ALPHA,
            src_alpha: vk::BlendFactor::CONSTANT_ALPHA,
            dst_alpha: vk::BlendFactor::CONSTANT_ALPHA,
        }
    }

    /// Attachment state for this blend
    pub fn attachment(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(self.write_mask)
            .blend_enable(self.enabled)
            .color_blend_op(self.color_op)
            .alpha_blend_op(self.alpha_op)
            .src_color_blend_factor(self.src_color)
            .dst_color_blend_factor(self.dst_color)
            .src_alpha_blend_factor(self.src_alpha)
            .dst_alpha_blend_factor(self.dst_alpha)
            .build()
    }
}

/// States set while recording instead of at pipeline creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynamicStates {
    /// Viewport and scissor are dynamic
    pub viewport_scissor: bool,
}

impl DynamicStates {
    /// Dynamic viewport and scissor
    pub fn viewport_scissor() -> Self {
        Self { viewport_scissor: true }
    }

    /// The dynamic state list
    pub fn states(&self) -> Vec<vk::DynamicState> {
        if self.viewport_scissor {
            vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]
        } else {
            Vec::new()
        }
    }
}

/// Attachment formats for dynamic rendering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentFormats {
    /// Colour attachment format
    pub color: vk::Format,
    /// Depth attachment format
    pub depth: vk::Format,
}

/// Complete fixed-function description of a graphics pipeline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraphicsPipelineDesc {
    /// Primitive assembly
    pub input_assembly: InputAssembly,
    /// Rasterizer
    pub rasterization: RasterizationState,
    /// Multisampling
    pub multisample: MultisampleState,
    /// Depth
    pub depth_stencil: DepthStencilState,
    /// Colour blend
    pub color_blend: ColorBlendState,
    /// Dynamic states
    pub dynamic_states: DynamicStates,
    /// Attachment formats
    pub formats: AttachmentFormats,
}

impl GraphicsPipelineDesc {
    /// State of the opaque scene pipelines
    pub fn opaque(formats: AttachmentFormats) -> Self {
        Self {
            input_assembly: InputAssembly::triangle_list(),
            rasterization: RasterizationState::fill(),
            multisample: MultisampleState::disabled(),
            depth_stencil: DepthStencilState::reverse_z(),
            color_blend: ColorBlendState::opaque(),
            dynamic_states: DynamicStates::viewport_scissor(),
            formats,
        }
    }
}

/// Viewport covering `extent` with +Y up, full depth range
pub fn flipped_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: extent.height as f32,
        width: extent.width as f32,
        height: -(extent.height as f32),
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Scissor covering `extent`
pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formats() -> AttachmentFormats {
        AttachmentFormats {
            color: vk::Format::R16G16B16A16_SFLOAT,
            depth: vk::Format::D32_SFLOAT,
        }
    }

    #[test]
    fn test_building_twice_gives_equal_state() {
        let a = GraphicsPipelineDesc::opaque(formats());
        let b = GraphicsPipelineDesc::opaque(formats());
        assert_eq!(a, b);

        let (ra, rb) = (a.rasterization.to_vk(), b.rasterization.to_vk());
        assert_eq!(ra.cull_mode, rb.cull_mode);
        assert_eq!(ra.front_face, rb.front_face);
        assert_eq!(a.depth_stencil.to_vk().depth_compare_op, b.depth_stencil.to_vk().depth_compare_op);
    }

    #[test]
    fn test_reverse_z_depth() {
        let depth = DepthStencilState::reverse_z().to_vk();
        assert_eq!(depth.depth_test_enable, vk::TRUE);
        assert_eq!(depth.depth_write_enable, vk::TRUE);
        assert_eq!(depth.depth_compare_op, vk::CompareOp::GREATER_OR_EQUAL);
        assert_eq!(depth.stencil_test_enable, vk::FALSE);
        assert_eq!(depth.depth_bounds_test_enable, vk::FALSE);
    }

    #[test]
    fn test_blend_is_configured_but_off() {
        let blend = ColorBlendState::opaque().attachment();
        assert_eq!(blend.blend_enable, vk::FALSE);
        assert_eq!(blend.color_write_mask, vk::ColorComponentFlags::RGBA);
        assert_eq!(blend.color_blend_op, vk::BlendOp::ADD);
        assert_eq!(blend.src_color_blend_factor, vk::BlendFactor::CONSTANT_ALPHA);
        assert_eq!(blend.dst_alpha_blend_factor, vk::BlendFactor::CONSTANT_ALPHA);
    }

    #[test]
    fn test_dynamic_states() {
        assert_eq!(
            DynamicStates::viewport_scissor().states(),
            vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]
        );
        assert!(DynamicStates { viewport_scissor: false }.states().is_empty());
    }

    #[test]
    fn test_viewport_points_up() {
        let viewport = flipped_viewport(vk::Extent2D { width: 800, height: 600 });
        assert_eq!(viewport.y, 600.0);
        assert_eq!(viewport.height, -600.0);
        assert_eq!(full_scissor(vk::Extent2D { width: 800, height: 600 }).extent.width, 800);
    }

    #[test]
    fn test_triangle_list_and_single_sample() {
        let assembly = InputAssembly::triangle_list().to_vk();
        assert_eq!(assembly.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(
            MultisampleState::disabled().to_vk().rasterization_samples,
            vk::SampleCountFlags::TYPE_1
        );
    }
}
