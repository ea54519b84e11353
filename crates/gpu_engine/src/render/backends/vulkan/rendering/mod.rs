// Vulkan rendering components

pub mod commands;
pub mod culling;
pub mod depth_pyramid;
pub mod pipeline_layout;
pub mod pipeline_state;
pub mod pipelines;
pub mod shader;

pub use commands::*;
pub use culling::*;
pub use depth_pyramid::*;
pub use pipeline_layout::*;
pub use pipeline_state::*;
pub use pipelines::*;
pub use shader::*;
