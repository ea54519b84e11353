//! Public rendering API
//!
//! Types the embedding application uses to drive the renderer each frame.

pub mod frame_data;
pub mod render_backend;

pub use frame_data::{CameraViewData, DrawRequest, RenderContext};
pub use render_backend::{BackendResult, RenderBackend};
