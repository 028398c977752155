// =============================================================================
// CONFIGURATION - Load settings from nano.toml
// =============================================================================
//
// Read-only input to the graphics core: names passed to the driver as
// metadata, the validation switch, and the independent lists of required
// layers, instance extensions and device extensions.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file, overridden by `NANO_CONFIG`
pub const DEFAULT_CONFIG_PATH: &str = "nano.toml";

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub shaders: ShaderConfig,
}

/// Names reported to the driver (diagnostic metadata only)
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub engine_name: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "NanoApplication".to_string(),
            engine_name: "NanoEngine".to_string(),
        }
    }
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Nano".to_string(),
            width: 800,
            height: 800,
        }
    }
}

/// Device requirements and presentation preferences
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub device_extensions: Vec<String>,
    pub instance_extensions: Vec<String>,
    pub present_mode: String,
    pub require_geometry_shader: bool,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            device_extensions: vec!["VK_KHR_swapchain".to_string()],
            instance_extensions: Vec::new(),
            present_mode: "mailbox".to_string(),
            require_geometry_shader: true,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation: bool,
    pub validation_layers: Vec<String>,
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation: true,
            validation_layers: vec!["VK_LAYER_KHRONOS_validation".to_string()],
            log_level: "info".to_string(),
        }
    }
}

/// Shader compiler collaborator settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub compiler: PathBuf,
    pub output_dir: PathBuf,
    pub sources: Vec<PathBuf>,
    pub timeout_secs: u64,
    pub force_recompile: bool,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            compiler: PathBuf::from("glslc"),
            output_dir: PathBuf::from("shaders/compiled"),
            sources: vec![
                PathBuf::from("shaders/triangle.vert"),
                PathBuf::from("shaders/triangle.frag"),
            ],
            timeout_secs: 30,
            force_recompile: false,
        }
    }
}

impl ShaderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Where the loaded configuration came from
///
/// Loading runs before the logger exists, so the outcome is kept and
/// logged with [`ConfigSource::report`] once logging is up.
#[derive(Debug)]
pub enum ConfigSource {
    File(PathBuf),
    Missing(PathBuf),
    /// Unreadable or malformed; defaults are used instead
    Invalid { path: PathBuf, error: String },
}

impl ConfigSource {
    pub fn report(&self) {
        match self {
            ConfigSource::File(path) => log::info!("Loaded configuration from {:?}", path),
            ConfigSource::Missing(path) => {
                log::info!("Config file not found at {:?}, using defaults", path)
            }
            ConfigSource::Invalid { path, error } => {
                log::warn!("Failed to load {:?}: {}. Using defaults.", path, error)
            }
        }
    }
}

impl Config {
    /// Load `NANO_CONFIG` or `nano.toml`, falling back to defaults if the
    /// file is unusable
    pub fn load() -> (Self, ConfigSource) {
        let path = std::env::var("NANO_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_or_default(path)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, ConfigSource) {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return (Config::default(), ConfigSource::Missing(path));
        }
        match Self::load_from_path(&path) {
            Ok(config) => (config, ConfigSource::File(path)),
            Err(e) => {
                let error = format!("{:#}", e);
                (Config::default(), ConfigSource::Invalid { path, error })
            }
        }
    }

    /// Load configuration from a specific path; a missing file yields defaults
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validation is only honoured in debug builds
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation
    }

    /// Preferred present mode as Vulkan enum
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::MAILBOX
            }
        }
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.debug.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.app.name, "NanoApplication");
        assert_eq!(config.app.engine_name, "NanoEngine");
        assert_eq!(config.graphics.device_extensions, vec!["VK_KHR_swapchain"]);
        assert_eq!(config.debug.validation_layers, vec!["VK_LAYER_KHRONOS_validation"]);
        assert_eq!(config.shaders.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn layers_and_extensions_stay_independent() {
        let config = Config::from_toml(
            r#"
            [graphics]
            device_extensions = ["VK_KHR_swapchain", "VK_KHR_maintenance1"]

            [debug]
            validation_layers = ["VK_LAYER_LUNARG_monitor"]
            "#,
        )
        .unwrap();

        assert_eq!(config.graphics.device_extensions.len(), 2);
        assert_eq!(config.debug.validation_layers, vec!["VK_LAYER_LUNARG_monitor"]);
    }

    #[test]
    fn present_mode_parsing() {
        let mut config = Config::default();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);

        config.graphics.present_mode = "FIFO".to_string();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);

        config.graphics.present_mode = "vsync-ish".to_string();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let config = Config::load_from_path("definitely/not/here.toml").unwrap();
        assert_eq!(config.window.width, 800);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::from_toml("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn load_outcome_is_kept_for_later_reporting() {
        let tmp = tempfile::tempdir().unwrap();

        let good = tmp.path().join("good.toml");
        std::fs::write(&good, "[window]\nwidth = 1024\n").unwrap();
        let (config, source) = Config::load_or_default(&good);
        assert_eq!(config.window.width, 1024);
        assert!(matches!(source, ConfigSource::File(ref p) if *p == good));

        let bad = tmp.path().join("bad.toml");
        std::fs::write(&bad, "[window]\nwidth = \"wide\"\n").unwrap();
        let (config, source) = Config::load_or_default(&bad);
        assert_eq!(config.window.width, 800);
        match source {
            ConfigSource::Invalid { path, error } => {
                assert_eq!(path, bad);
                assert!(error.contains("Failed to parse config file"), "{}", error);
            }
            other => panic!("expected Invalid, got {:?}", other),
        }

        let missing = tmp.path().join("missing.toml");
        let (_, source) = Config::load_or_default(&missing);
        assert!(matches!(source, ConfigSource::Missing(ref p) if *p == missing));
    }
}
