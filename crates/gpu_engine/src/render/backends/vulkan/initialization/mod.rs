// Vulkan initialization components

pub mod capabilities;
pub mod context;
pub mod surface;
pub mod window;

pub use capabilities::*;
pub use context::*;
pub use surface::*;
pub use window::*;
