//! Vulkan resource management
//!
//! Buffers and images allocated through `vk-mem`, descriptor layouts, the
//! texture table and the upload manager that fills them.

/// Buffers and their push descriptor records
pub mod buffer;

/// Images, views and samplers
pub mod image;

/// Descriptor set layouts and push descriptor writes
pub mod descriptor_set;

/// Fixed-capacity bindless texture table
pub mod texture_table;

/// Scene and texture uploads
pub mod upload;

/// Bottom-level acceleration structures
pub mod acceleration;

pub use acceleration::BottomLevelStructures;
pub use buffer::{AllocatedBuffer, MemoryLocation, PushDescriptorBuffer};
pub use descriptor_set::{
    bindings, global_bindings, BindingVisibility, DescriptorPool, DescriptorSetLayout, DescriptorSetLayoutBuilder,
    PushDescriptorWrites,
};
pub use image::{vk_format, AllocatedImage, ImageDesc, Sampler};
pub use texture_table::{TextureHandle, TextureTable};
pub use upload::{ResourceManager, SceneResources, StaticBuffers, TextureSet};
