//! Asset loading collaborators
//!
//! The renderer never touches the filesystem directly. Shader bytecode comes
//! through a [`ShaderSource`] and textures through a [`TextureSource`]; the
//! file-backed implementations here are what applications normally use.

pub mod shader_source;
pub mod image_loader;
pub mod dds;

pub use shader_source::{ShaderSource, FileShaderSource, MemoryShaderSource};
pub use image_loader::{DecodedImage, PixelFormat, TextureSource, ImageFileSource};
pub use dds::{DdsFileSource, DdsHeader};

use std::path::PathBuf;
use thiserror::Error;

/// Asset loading errors
#[derive(Error, Debug)]
pub enum AssetError {
    /// The file could not be read
    #[error("Failed to read {path:?}: {source}")]
    Io {
        /// Path that was read
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The file exists but holds no bytes
    #[error("Asset {0:?} is empty")]
    Empty(String),

    /// SPIR-V bytecode that cannot be handed to the driver
    #[error("Invalid SPIR-V in {key}: {reason}")]
    InvalidBytecode {
        /// Shader key
        key: String,
        /// What was wrong with it
        reason: String,
    },

    /// Malformed or unsupported DDS file
    #[error("Invalid DDS file: {0}")]
    InvalidDds(String),

    /// Image decoding failed
    #[error("Failed to decode image: {0}")]
    Decode(String),
}

/// Result type for asset operations
pub type AssetResult<T> = Result<T, AssetError>;
