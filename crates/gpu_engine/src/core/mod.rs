//! # Core Engine Module
//!
//! Shared configuration types used by the renderer and by embedding
//! applications.

pub mod config;

pub use config::{
    ApplicationConfig,
    EngineConfig,
    RendererConfig,
    ShaderConfig,
    Config,
    ConfigError,
};
