//! Renderer, shader and window settings

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{Config, ConfigError};

/// Upper bound accepted for `frames_in_flight`
pub const MAX_FRAMES_IN_FLIGHT_LIMIT: usize = 8;

/// # Shader Configuration
///
/// Paths of the SPIR-V pair used to build the default pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: String,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: String,
}

impl ShaderConfig {
    /// Create a new shader configuration
    pub fn new(vertex_path: impl Into<String>, fragment_path: impl Into<String>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }

    /// Create shader config with automatic path resolution
    ///
    /// Looks in the usual build-output and source locations so binaries work
    /// from either the workspace root or their own directory.
    pub fn with_path_resolution(vertex_file: &str, fragment_file: &str) -> Self {
        const SEARCH_DIRS: [&str; 5] = ["target/shaders", "../target/shaders", "shaders", "resources/shaders", "."];

        let resolve = |file: &str| {
            SEARCH_DIRS
                .iter()
                .map(|dir| Path::new(dir).join(file))
                .find(|candidate| candidate.exists())
                .map_or_else(
                    || format!("target/shaders/{file}"),
                    |found| found.to_string_lossy().into_owned(),
                )
        };

        Self {
            vertex_shader_path: resolve(vertex_file),
            fragment_shader_path: resolve(fragment_file),
        }
    }

    /// Validate that shader files exist
    pub fn validate(&self) -> Result<(), ConfigError> {
        for path in [&self.vertex_shader_path, &self.fragment_shader_path] {
            if !Path::new(path).exists() {
                return Err(ConfigError::Invalid(format!("Shader not found: {path}")));
            }
        }
        Ok(())
    }
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self::with_path_resolution("default.vert.spv", "default.frag.spv")
    }
}

/// Window creation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Title bar text
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
    /// Whether the user may resize the window
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Renderer".to_string(),
            width: 800,
            height: 600,
            resizable: true,
        }
    }
}

/// # Vulkan Renderer Configuration
///
/// Application metadata for instance creation, the frames-in-flight count,
/// validation, and the optional default pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Engine name for Vulkan instance creation
    pub engine_name: String,
    /// Number of frame slots recorded ahead of the GPU
    pub frames_in_flight: usize,
    /// Whether to enable Vulkan validation layers (`None` = debug builds only)
    pub enable_validation: Option<bool>,
    /// Clear colour used by the built-in recording callback
    pub clear_color: [f32; 4],
    /// Window settings
    pub window: WindowConfig,
    /// Shaders for the default pipeline; no pipeline is built when absent
    pub shaders: Option<ShaderConfig>,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            application_version: (1, 0, 0),
            engine_name: "No Engine".to_string(),
            frames_in_flight: 2,
            enable_validation: None,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            window: WindowConfig::default(),
            shaders: None,
        }
    }

    /// Set application version
    pub fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.application_version = (major, minor, patch);
        self
    }

    /// Set custom shader configuration
    pub fn with_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.shaders = Some(shaders);
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

    /// Set the clear colour
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Set window settings
    pub fn with_window(mut self, window: WindowConfig) -> Self {
        self.window = window;
        self
    }

    /// Whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("Application name cannot be empty".to_string()));
        }

        if self.frames_in_flight == 0 || self.frames_in_flight > MAX_FRAMES_IN_FLIGHT_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "Frames in flight must be between 1 and {MAX_FRAMES_IN_FLIGHT_LIMIT}, got {}",
                self.frames_in_flight
            )));
        }

        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "Window size must be non-zero, got {}x{}",
                self.window.width, self.window.height
            )));
        }

        if let Some(shaders) = &self.shaders {
            shaders.validate()?;
        }

        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Vulkan Renderer Application")
    }
}

impl Config for RendererConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFormat;

    #[test]
    fn test_default_config_is_valid() {
        let config = RendererConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert!(config.shaders.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_frames_in_flight_bounds() {
        assert!(RendererConfig::default().with_frames_in_flight(0).validate().is_err());
        assert!(RendererConfig::default().with_frames_in_flight(1).validate().is_ok());
        assert!(RendererConfig::default().with_frames_in_flight(8).validate().is_ok());
        assert!(RendererConfig::default().with_frames_in_flight(9).validate().is_err());
    }

    #[test]
    fn test_empty_name_rejected() {
        let config = RendererConfig::new("");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_window_rejected() {
        let window = WindowConfig { width: 0, ..WindowConfig::default() };
        assert!(RendererConfig::default().with_window(window).validate().is_err());
    }

    #[test]
    fn test_missing_shaders_rejected() {
        let config = RendererConfig::default()
            .with_shaders(ShaderConfig::new("does/not/exist.vert.spv", "does/not/exist.frag.spv"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_existing_shaders_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let vert = dir.path().join("a.vert.spv");
        let frag = dir.path().join("a.frag.spv");
        std::fs::write(&vert, [0u8; 4]).unwrap();
        std::fs::write(&frag, [0u8; 4]).unwrap();

        let shaders = ShaderConfig::new(vert.to_string_lossy(), frag.to_string_lossy());
        assert!(shaders.validate().is_ok());
    }

    #[test]
    fn test_explicit_validation_overrides_build_type() {
        assert!(RendererConfig::default().with_validation(true).validation_enabled());
        assert!(!RendererConfig::default().with_validation(false).validation_enabled());
        assert_eq!(RendererConfig::default().validation_enabled(), cfg!(debug_assertions));
    }

    #[test]
    fn test_toml_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renderer.toml");
        let config = RendererConfig::new("Viewer")
            .with_version(0, 3, 1)
            .with_frames_in_flight(3)
            .with_validation(false)
            .with_clear_color([0.1, 0.2, 0.3, 1.0]);

        config.save_to_file(&path).unwrap();
        let loaded = RendererConfig::load_from_file(&path).unwrap();

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_ron_file_round_trip_with_shaders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renderer.ron");
        let config = RendererConfig::new("Viewer").with_shaders(ShaderConfig::new("v.spv", "f.spv"));

        config.save_to_file(&path).unwrap();
        let loaded = RendererConfig::load_from_file(&path).unwrap();

        assert_eq!(loaded.shaders, Some(ShaderConfig::new("v.spv", "f.spv")));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let text = r#"
            application_name = "Partial"
            frames_in_flight = 3

            [window]
            title = "Partial window"
        "#;
        let config = RendererConfig::from_str_as(text, ConfigFormat::Toml).unwrap();

        assert_eq!(config.application_name, "Partial");
        assert_eq!(config.frames_in_flight, 3);
        assert_eq!(config.window.title, "Partial window");
        assert_eq!(config.window.width, 800);
        assert_eq!(config.engine_name, "No Engine");
    }
}
