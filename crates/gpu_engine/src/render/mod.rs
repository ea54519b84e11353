//! # Rendering System
//!
//! - [`api`]: what the embedding application sees: per-frame [`api::RenderContext`]
//!   and the [`api::RenderBackend`] trait
//! - [`culling`]: culling math shared with the compute shaders, plus a CPU
//!   reference of the two-phase algorithm
//! - [`backends`]: the Vulkan implementation

pub mod api;
pub mod culling;

/// Graphics backend implementations
pub mod backends;

pub use api::{BackendResult, CameraViewData, DrawRequest, RenderBackend, RenderContext};
pub use backends::vulkan::VulkanRenderer;
