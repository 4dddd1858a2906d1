//! Renderer, graphics and window settings

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::{Config, ConfigError};

bitflags! {
    /// Which validation-layer message severities reach the log
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ValidationSeverity: u32 {
        /// Diagnostic chatter from the loader and layers
        const VERBOSE = 1 << 0;
        /// Informational messages
        const INFO = 1 << 1;
        /// Likely misuse of the API
        const WARNING = 1 << 2;
        /// Invalid API usage
        const ERROR = 1 << 3;
    }
}

bitflags! {
    /// Which validation-layer message categories reach the log
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ValidationCategory: u32 {
        /// Events unrelated to validation or performance
        const GENERAL = 1 << 0;
        /// Invalid API usage
        const VALIDATION = 1 << 1;
        /// Potentially non-optimal API use
        const PERFORMANCE = 1 << 2;
    }
}

impl Default for ValidationSeverity {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::WARNING | Self::ERROR
        } else {
            Self::empty()
        }
    }
}

impl Default for ValidationCategory {
    fn default() -> Self {
        Self::all()
    }
}

/// Device-level rendering options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphicsSettings {
    /// Force the ordered (FIFO) present mode
    pub vsync: bool,
    /// Severity filter for validation output; empty disables validation layers
    pub validation: ValidationSeverity,
    /// Category filter for validation output
    pub validation_category: ValidationCategory,
}

impl Default for GraphicsSettings {
    fn default() -> Self {
        Self {
            vsync: false,
            validation: ValidationSeverity::default(),
            validation_category: ValidationCategory::default(),
        }
    }
}

impl GraphicsSettings {
    /// Whether validation layers should be requested at all
    pub fn validation_enabled(&self) -> bool {
        !self.validation.is_empty()
    }
}

/// Window presentation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WindowMode {
    /// Decorated window
    #[default]
    Windowed,
    /// Undecorated window covering the monitor
    Borderless,
    /// Exclusive fullscreen
    Fullscreen,
}

/// Window creation options consumed by the windowing collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    /// Title bar text
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
    /// Presentation mode
    pub mode: WindowMode,
    /// Pause frame submission while the window is unfocused
    pub focus_freeze: bool,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            title: "Deferred Engine".to_string(),
            width: 800,
            height: 600,
            mode: WindowMode::Windowed,
            focus_freeze: true,
        }
    }
}

/// SPIR-V binaries for both passes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderPaths {
    /// Geometry pass vertex stage
    pub geometry_vertex: PathBuf,
    /// Geometry pass fragment stage
    pub geometry_fragment: PathBuf,
    /// Lighting pass vertex stage
    pub lighting_vertex: PathBuf,
    /// Lighting pass fragment stage
    pub lighting_fragment: PathBuf,
}

impl Default for ShaderPaths {
    fn default() -> Self {
        Self {
            geometry_vertex: PathBuf::from("assets/shaders/mrt_vs.spv"),
            geometry_fragment: PathBuf::from("assets/shaders/mrt_fs.spv"),
            lighting_vertex: PathBuf::from("assets/shaders/deferred_vs.spv"),
            lighting_fragment: PathBuf::from("assets/shaders/deferred_fs.spv"),
        }
    }
}

impl ShaderPaths {
    fn all(&self) -> [&Path; 4] {
        [
            self.geometry_vertex.as_path(),
            self.geometry_fragment.as_path(),
            self.lighting_vertex.as_path(),
            self.lighting_fragment.as_path(),
        ]
    }

    /// Join relative paths onto `base`; absolute paths are kept as they are
    #[must_use]
    pub fn resolve(&self, base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        let join = |p: &Path| if p.is_absolute() { p.to_path_buf() } else { base.join(p) };
        Self {
            geometry_vertex: join(&self.geometry_vertex),
            geometry_fragment: join(&self.geometry_fragment),
            lighting_vertex: join(&self.lighting_vertex),
            lighting_fragment: join(&self.lighting_fragment),
        }
    }

    /// Report the first shader binary that does not exist
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.all().into_iter().find(|p| !p.exists()) {
            Some(missing) => Err(ConfigError::Invalid(format!(
                "shader binary not found: {}",
                missing.display()
            ))),
            None => Ok(()),
        }
    }
}

/// Top-level renderer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Device-level options
    pub graphics: GraphicsSettings,
    /// Window options
    pub window: WindowSettings,
    /// Number of buffered frames in flight
    pub frames_in_flight: u32,
    /// Upper bound on models with live descriptor sets
    pub max_models: u32,
    /// Fence wait limit before a frame is declared stuck
    pub fence_timeout_ms: u64,
    /// Background color written by the lighting pass
    pub clear_color: [f32; 4],
    /// Shader binaries
    pub shaders: ShaderPaths,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "Deferred Engine Application".to_string(),
            graphics: GraphicsSettings::default(),
            window: WindowSettings::default(),
            frames_in_flight: 2,
            max_models: 64,
            fence_timeout_ms: 5_000,
            clear_color: [0.0, 0.0, 0.0, 0.0],
            shaders: ShaderPaths::default(),
        }
    }
}

impl Config for RendererConfig {}

impl RendererConfig {
    /// Highest accepted frames-in-flight count
    pub const MAX_FRAMES_IN_FLIGHT: u32 = 4;

    /// Create a configuration for the named application
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            ..Default::default()
        }
    }

    /// Enable or disable vsync
    #[must_use]
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.graphics.vsync = vsync;
        self
    }

    /// Set validation severity and category filters
    #[must_use]
    pub fn with_validation(mut self, severity: ValidationSeverity, category: ValidationCategory) -> Self {
        self.graphics.validation = severity;
        self.graphics.validation_category = category;
        self
    }

    /// Set the buffered frame count, clamped to `1..=MAX_FRAMES_IN_FLIGHT`
    #[must_use]
    pub fn with_frames_in_flight(mut self, frames: u32) -> Self {
        self.frames_in_flight = frames.clamp(1, Self::MAX_FRAMES_IN_FLIGHT);
        self
    }

    /// Set the model capacity
    #[must_use]
    pub fn with_max_models(mut self, max_models: u32) -> Self {
        self.max_models = max_models;
        self
    }

    /// Set the window options
    #[must_use]
    pub fn with_window(mut self, window: WindowSettings) -> Self {
        self.window = window;
        self
    }

    /// Set the lighting pass background color
    #[must_use]
    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Set shader binary paths
    #[must_use]
    pub fn with_shaders(mut self, shaders: ShaderPaths) -> Self {
        self.shaders = shaders;
        self
    }

    /// Fence timeout in nanoseconds, as Vulkan expects it
    pub fn fence_timeout_ns(&self) -> u64 {
        self.fence_timeout_ms.saturating_mul(1_000_000)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("application name cannot be empty".to_string()));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "window size {}x{} has a zero dimension",
                self.window.width, self.window.height
            )));
        }
        if self.frames_in_flight == 0 || self.frames_in_flight > Self::MAX_FRAMES_IN_FLIGHT {
            return Err(ConfigError::Invalid(format!(
                "frames in flight must be within 1..={}, got {}",
                Self::MAX_FRAMES_IN_FLIGHT,
                self.frames_in_flight
            )));
        }
        if self.max_models == 0 {
            return Err(ConfigError::Invalid("max_models must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("deferred_engine_{}_{name}", std::process::id()))
    }

    #[test]
    fn test_defaults_match_engine_conventions() {
        let config = RendererConfig::default();
        assert!(!config.graphics.vsync);
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.graphics.validation_category, ValidationCategory::all());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_frames_in_flight_is_clamped() {
        assert_eq!(RendererConfig::default().with_frames_in_flight(0).frames_in_flight, 1);
        assert_eq!(RendererConfig::default().with_frames_in_flight(99).frames_in_flight, 4);
        assert_eq!(RendererConfig::default().with_frames_in_flight(3).frames_in_flight, 3);
    }

    #[test]
    fn test_validate_rejects_zero_window() {
        let mut config = RendererConfig::default();
        config.window.height = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_empty_severity_disables_validation() {
        let config = RendererConfig::default()
            .with_validation(ValidationSeverity::empty(), ValidationCategory::GENERAL);
        assert!(!config.graphics.validation_enabled());

        let config = RendererConfig::default()
            .with_validation(ValidationSeverity::ERROR, ValidationCategory::VALIDATION);
        assert!(config.graphics.validation_enabled());
    }

    #[test]
    fn test_toml_round_trip() {
        let path = temp_path("renderer.toml");
        let config = RendererConfig::new("toml test")
            .with_vsync(true)
            .with_validation(
                ValidationSeverity::WARNING | ValidationSeverity::ERROR,
                ValidationCategory::VALIDATION | ValidationCategory::PERFORMANCE,
            )
            .with_frames_in_flight(3);

        config.save_to_file(&path).expect("save toml");
        let loaded = RendererConfig::load_from_file(&path).expect("load toml");
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_ron_round_trip() {
        let path = temp_path("renderer.ron");
        let config = RendererConfig::new("ron test").with_clear_color([0.1, 0.2, 0.3, 1.0]);

        config.save_to_file(&path).expect("save ron");
        let loaded = RendererConfig::load_from_file(&path).expect("load ron");
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: RendererConfig = toml::from_str(
            r#"
            application_name = "partial"

            [graphics]
            vsync = true
            "#,
        )
        .expect("parse partial config");

        assert_eq!(parsed.application_name, "partial");
        assert!(parsed.graphics.vsync);
        assert_eq!(parsed.max_models, 64);
        assert_eq!(parsed.window, WindowSettings::default());
    }

    #[test]
    fn test_shader_paths_resolve_relative_only() {
        let mut paths = ShaderPaths::default();
        let absolute = std::env::temp_dir().join("abs_fs.spv");
        paths.lighting_fragment = absolute.clone();

        let resolved = paths.resolve("/opt/game");
        assert_eq!(resolved.geometry_vertex, PathBuf::from("/opt/game/assets/shaders/mrt_vs.spv"));
        assert_eq!(resolved.lighting_fragment, absolute);
    }

    #[test]
    fn test_shader_paths_validate_reports_missing() {
        let paths = ShaderPaths::default().resolve("/nonexistent/root");
        assert!(matches!(paths.validate(), Err(ConfigError::Invalid(_))));
    }
}
