// Vulkan state management

pub mod attachments;
pub mod swapchain;
pub mod sync;

pub use attachments::*;
pub use swapchain::*;
pub use sync::*;
