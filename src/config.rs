// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every field has a default, so a missing or partial config.toml still yields
// a usable configuration.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub hot_reload: HotReloadConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Engine".to_string(),
            width: 1280,
            height: 720,
            resizable: true,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Directory every asset path is resolved against
    pub asset_root: PathBuf,
    /// Shader pair base path, without the `.vert.spv` / `.frag.spv` suffix
    pub shader_base: String,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            asset_root: PathBuf::from("assets"),
            shader_base: "shaders/main".to_string(),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honoured in builds with debug assertions
    pub validation_layers: bool,
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
            log_to_file: false,
            log_file: "vulkan_debug.log".to_string(),
        }
    }
}

/// Shader hot-reload settings
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct HotReloadConfig {
    pub enabled: bool,
}

impl Config {
    /// Load config.toml, falling back to defaults on error.
    ///
    /// Called before the logger exists, so the error is handed back to be
    /// reported once logging is up.
    pub fn load() -> (Self, Option<anyhow::Error>) {
        Self::load_or_default("config.toml")
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load_from_path(path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validation layers are a debug-build feature only
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }

    /// Log level as a `log` filter, or None for an unknown name
    pub fn log_level(&self) -> Option<log::LevelFilter> {
        self.debug.log_level.parse().ok()
    }
}
