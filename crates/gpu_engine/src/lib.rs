//! # GPU Engine
//!
//! A GPU-driven Vulkan 1.3 renderer. Scene geometry is uploaded once into
//! persistent device buffers; every frame the GPU culls the render objects in
//! two phases and draws them with indirect-count commands.
//!
//! ## Frame
//!
//! - **Initial cull**: objects visible last frame that pass the frustum test
//! - **First pass**: draw them, building depth
//! - **Depth pyramid**: min-reduce that depth into a mip chain
//! - **Late cull**: test everything against frustum and pyramid, draw newly
//!   visible objects and record visibility for the next frame
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gpu_engine::prelude::*;
//!
//! fn run(window: &mut Window, scene: &SceneData, texture: &DecodedImage) -> Result<(), VulkanError> {
//!     let config = RendererConfig::default();
//!     let shaders = Box::new(FileShaderSource::new(config.shaders.directory.clone()));
//!     let mut renderer = VulkanRenderer::new(window, &config, shaders)?;
//!     renderer.upload_texture(texture)?;
//!     renderer.upload_scene(scene)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

// Configuration
pub mod config;
pub mod core;

// Shared utilities
pub mod foundation;

// Collaborators: shader bytecode and texture decoding
pub mod assets;

// GPU-resident scene records
pub mod scene;

// Renderer
pub mod render;

/// Common imports for renderer users
pub mod prelude {
    pub use crate::{
        assets::{DecodedImage, FileShaderSource, ImageFileSource, DdsFileSource, ShaderSource, TextureSource},
        core::config::{ApplicationConfig, RendererConfig, ShaderConfig},
        foundation::math::{Mat4, Vec3},
        render::{
            api::{DrawRequest, RenderBackend, RenderContext},
            backends::vulkan::{SurfaceProvider, VulkanError, VulkanRenderer, Window},
        },
        scene::{Material, MeshTransform, SceneBuilder, SceneData, SceneProvider},
    };
}
