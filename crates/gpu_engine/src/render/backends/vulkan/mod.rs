//! Vulkan backend implementation
//!
//! Organized into initialization, resources, rendering and state modules,
//! tied together by [`VulkanRenderer`].

/// Vulkan initialization types (context, capabilities, surface, window)
pub mod initialization;

/// Vulkan resource management (buffers, images, descriptors, uploads)
pub mod resources;

/// Vulkan rendering operations (shaders, pipelines, culling, depth pyramid)
pub mod rendering;

/// Vulkan state management (swapchain, attachments, synchronization)
pub mod state;

/// Main Vulkan renderer implementation
pub mod renderer;

// Re-export main renderer
pub use renderer::VulkanRenderer;

// Re-export core initialization types
pub use initialization::capabilities::{DeviceCapabilities, DeviceFeatures, ExtensionLoaders};
pub use initialization::context::{PhysicalDeviceInfo, VulkanContext, VulkanError, VulkanResult};
pub use initialization::surface::SurfaceProvider;
pub use initialization::window::Window;

// Re-export resource types
pub use resources::{
    AllocatedBuffer, AllocatedImage, DescriptorSetLayout, DescriptorSetLayoutBuilder, PushDescriptorBuffer,
    ResourceManager, SceneResources, TextureHandle,
};

// Re-export rendering types
pub use rendering::commands::CommandPool;
pub use rendering::depth_pyramid::{DepthPyramid, SamplerPolicy};
pub use rendering::pipeline_state::GraphicsPipelineDesc;
pub use rendering::shader::{ComputePipeline, GraphicsPipeline, ShaderModule};

// Re-export state types
pub use state::swapchain::Swapchain;
pub use state::sync::{Fence, FrameRing, FrameTools, Semaphore};
