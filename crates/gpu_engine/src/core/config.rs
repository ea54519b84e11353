//! # Unified Configuration System
//!
//! Configuration for the renderer, its shaders and engine-wide behaviour such as
//! logging. Everything here is plain data that round-trips through TOML or RON
//! via the [`Config`] trait.

use serde::{Serialize, Deserialize};
use std::path::{Path, PathBuf};

pub use crate::config::{Config, ConfigError};

/// Directories probed by [`ShaderConfig::with_path_resolution`], in order
const SHADER_SEARCH_DIRS: [&str; 5] = [
    "target/shaders",
    "shaders",
    "resources/shaders",
    "../target/shaders",
    "../../target/shaders",
];

/// # Shader Configuration
///
/// Locations of every SPIR-V binary the renderer loads. File names are keys
/// relative to `directory`; the renderer hands them to a
/// [`ShaderSource`](crate::assets::ShaderSource).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    /// Directory holding the compiled `.spv` files
    pub directory: PathBuf,
    /// Initial (pre-pass) culling compute shader
    pub initial_cull: String,
    /// Late culling compute shader
    pub late_cull: String,
    /// Depth pyramid reduction compute shader
    pub depth_pyramid: String,
    /// Background compute shader used when no geometry is loaded
    pub background: String,
    /// Main vertex shader
    pub vertex: String,
    /// Main fragment shader
    pub fragment: String,
    /// Task shader for the mesh shading path
    pub task: String,
    /// Mesh shader for the mesh shading path
    pub mesh: String,
}

impl ShaderConfig {
    /// Create a shader configuration rooted at `directory` with the default file names
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            initial_cull: "initial_cull.comp.spv".to_string(),
            late_cull: "late_cull.comp.spv".to_string(),
            depth_pyramid: "depth_pyramid.comp.spv".to_string(),
            background: "background.comp.spv".to_string(),
            vertex: "main_object.vert.spv".to_string(),
            fragment: "main_object.frag.spv".to_string(),
            task: "main_object.task.spv".to_string(),
            mesh: "main_object.mesh.spv".to_string(),
        }
    }

    /// Create shader config with automatic path resolution
    ///
    /// Tries a few common locations so applications can be launched from the
    /// workspace root or from a crate directory.
    pub fn with_path_resolution() -> Self {
        let defaults = Self::new("target/shaders");
        let directory = SHADER_SEARCH_DIRS
            .iter()
            .map(PathBuf::from)
            .find(|dir| dir.join(&defaults.vertex).exists())
            .unwrap_or_else(|| PathBuf::from("target/shaders"));

        Self { directory, ..defaults }
    }

    /// Full path of a shader key
    pub fn path_of(&self, key: &str) -> PathBuf {
        self.directory.join(key)
    }

    /// Shaders without which the renderer cannot start
    pub fn required(&self) -> [&str; 5] {
        [
            &self.initial_cull,
            &self.late_cull,
            &self.depth_pyramid,
            &self.vertex,
            &self.fragment,
        ]
    }

    /// Required shader keys whose files are missing on disk
    pub fn missing_required(&self) -> Vec<String> {
        self.required()
            .iter()
            .filter(|key| !Path::new(&self.path_of(key)).exists())
            .map(|key| key.to_string())
            .collect()
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::with_path_resolution()
    }
}

/// # Vulkan Renderer Configuration
///
/// Feature requests are only requests: mesh shading and ray tracing are
/// enabled when the device also supports them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Number of frames the CPU may record ahead of the GPU
    pub frames_in_flight: usize,
    /// Whether to enable Vulkan validation layers, `None` follows the build type
    pub enable_validation: Option<bool>,
    /// Use task/mesh shaders when the device supports them
    pub mesh_shading: bool,
    /// Build bottom-level acceleration structures when the device supports them
    pub ray_tracing: bool,
    /// Run the depth-pyramid occlusion test in the late culling pass
    pub occlusion_culling: bool,
    /// Pick coarser LODs for distant objects during culling
    pub lod_selection: bool,
    /// Screen-space error target for LOD selection, in view-space units per radius
    pub lod_target: f32,
    /// Maximum number of textures the bindless table can hold
    pub texture_capacity: u32,
    /// Clear colour of the first render pass
    pub clear_color: [f32; 4],
    /// Shader configuration, kept last so it serializes as a trailing TOML table
    pub shaders: ShaderConfig,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            application_version: (1, 0, 0),
            frames_in_flight: 2,
            enable_validation: None,
            mesh_shading: false,
            ray_tracing: false,
            occlusion_culling: true,
            lod_selection: true,
            lod_target: 0.01,
            texture_capacity: 5000,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            shaders: ShaderConfig::default(),
        }
    }

    /// Set custom shader configuration
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = shaders;
        self
    }

    /// Set the number of frames in flight
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Enable or disable validation layers
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Request the task/mesh shader path
    pub fn with_mesh_shading(mut self, enabled: bool) -> Self {
        self.mesh_shading = enabled;
        self
    }

    /// Request BLAS builds at upload time
    pub fn with_ray_tracing(mut self, enabled: bool) -> Self {
        self.ray_tracing = enabled;
        self
    }

    /// Toggle the late-pass occlusion test
    pub fn with_occlusion_culling(mut self, enabled: bool) -> Self {
        self.occlusion_culling = enabled;
        self
    }

    /// Whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("application name cannot be empty".to_string()));
        }

        if !(1..=3).contains(&self.frames_in_flight) {
            return Err(ConfigError::Invalid(format!(
                "frames in flight must be between 1 and 3, got {}",
                self.frames_in_flight
            )));
        }

        if self.texture_capacity == 0 {
            return Err(ConfigError::Invalid("texture capacity must be at least 1".to_string()));
        }

        if !(self.lod_target > 0.0) {
            return Err(ConfigError::Invalid(format!("LOD target must be positive, got {}", self.lod_target)));
        }

        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("GPU Engine Application")
    }
}

/// # Engine Configuration
///
/// Process-wide settings that are not specific to the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default log filter when `RUST_LOG` is not set
    pub log_level: String,
    /// Window size requested at startup
    pub window_size: (u32, u32),
}

impl EngineConfig {
    /// Create a new engine configuration
    pub fn new() -> Self {
        Self {
            log_level: "info".to_string(),
            window_size: (1280, 720),
        }
    }

    /// Set log level
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// # Complete Application Configuration
///
/// Top-level configuration applications load from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Engine core configuration
    pub engine: EngineConfig,
    /// Rendering system configuration
    pub renderer: RendererConfig,
}

impl ApplicationConfig {
    /// Create a new application configuration with defaults
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            engine: EngineConfig::default(),
            renderer: RendererConfig::new(app_name),
        }
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.window_size.0 == 0 || self.engine.window_size.1 == 0 {
            return Err(ConfigError::Invalid("window size must be non-zero".to_string()));
        }
        self.renderer.validate()
    }
}

impl Config for ApplicationConfig {}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("gpu_engine_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_default_renderer_config_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frames_in_flight, 2);
        assert!(config.occlusion_culling);
    }

    #[test]
    fn test_frames_in_flight_bounds() {
        assert!(RendererConfig::default().with_frames_in_flight(0).validate().is_err());
        assert!(RendererConfig::default().with_frames_in_flight(4).validate().is_err());
        assert!(RendererConfig::default().with_frames_in_flight(3).validate().is_ok());
    }

    #[test]
    fn test_empty_name_rejected() {
        let config = RendererConfig::new("");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_shader_paths_join_directory() {
        let shaders = ShaderConfig::new("out");
        assert_eq!(shaders.path_of(&shaders.vertex), PathBuf::from("out/main_object.vert.spv"));
        assert_eq!(shaders.required().len(), 5);
        assert_eq!(shaders.missing_required().len(), 5);
    }

    #[test]
    fn test_toml_round_trip() {
        let path = temp_path("config.toml");
        let mut config = ApplicationConfig::new("Round Trip");
        config.renderer.mesh_shading = true;
        config.renderer.shaders = ShaderConfig::new("somewhere");
        config.save_to_file(&path).unwrap();

        let loaded = ApplicationConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_ron_partial_file_uses_defaults() {
        let path = temp_path("partial.ron");
        std::fs::write(&path, "(renderer: (frames_in_flight: 3, occlusion_culling: false))").unwrap();

        let loaded = ApplicationConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded.renderer.frames_in_flight, 3);
        assert!(!loaded.renderer.occlusion_culling);
        assert_eq!(loaded.engine.log_level, "info");
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let result = ApplicationConfig::load_from_file("config.json");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_)) | Err(ConfigError::Io(_))));
        let save = ApplicationConfig::default().save_to_file(temp_path("config.json"));
        assert!(matches!(save, Err(ConfigError::UnsupportedFormat(_))));
    }
}
