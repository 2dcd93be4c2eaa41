//! Yulan configuration system
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. CLI arguments
//! 2. Environment variables (YULAN_MODULE_CDN, YULAN_STYLE_CDN, YULAN_DISABLE_CACHE)
//! 3. User-level (~/.config/yulan/config.toml)
//! 4. Default values
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use yulan::util::config::load_user_config;
//!
//! let mut config = load_user_config().unwrap();
//! config.apply_env();
//! let options = config.to_pipeline_options();
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::resolve::CdnConfig;
use crate::runner::{BaseScope, PipelineOptions, RenderBinding};

/// Environment variable overriding the module CDN
pub const ENV_MODULE_CDN: &str = "YULAN_MODULE_CDN";
/// Environment variable overriding the stylesheet CDN
pub const ENV_STYLE_CDN: &str = "YULAN_STYLE_CDN";
/// Environment variable overriding `pipeline.disable_cache`
pub const ENV_DISABLE_CACHE: &str = "YULAN_DISABLE_CACHE";

/// User-level configuration for Yulan
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct UserConfig {
    /// CDN base URLs
    #[serde(default)]
    pub cdn: CdnConfig,
    /// Pipeline settings
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Base scope entries passed to every evaluation
    #[serde(default)]
    pub scope: BaseScope,
    /// Legacy render call rewrite
    #[serde(default)]
    pub render: RenderBinding,
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Clear placeholders instead of showing the last rendered result
    #[serde(default)]
    pub disable_cache: bool,
    /// Per-request timeout; unset means requests never time out
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    /// Quiet period before a file change is submitted (`watch`)
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_debounce_ms() -> u64 {
    300
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            disable_cache: false,
            request_timeout_secs: None,
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}

impl UserConfig {
    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_with(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_env_with(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) {
        if let Some(base) = lookup(ENV_MODULE_CDN) {
            debug!("{} = {}", ENV_MODULE_CDN, base);
            self.cdn.module_base = base;
        }
        if let Some(base) = lookup(ENV_STYLE_CDN) {
            debug!("{} = {}", ENV_STYLE_CDN, base);
            self.cdn.style_base = base;
        }
        if let Some(value) = lookup(ENV_DISABLE_CACHE) {
            match parse_flag(&value) {
                Some(flag) => self.pipeline.disable_cache = flag,
                None => warn!("ignoring {}={:?}: expected a boolean", ENV_DISABLE_CACHE, value),
            }
        }
    }

    /// Options for [`Pipeline::new`](crate::runner::Pipeline::new)
    pub fn to_pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            cdn: self.cdn.clone(),
            disable_cache: self.pipeline.disable_cache,
            base_scope: self.scope.clone(),
            render_binding: self.render.clone(),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.pipeline
            .request_timeout_secs
            .map(Duration::from_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.pipeline.debounce_ms)
    }
}

/// Get the user config directory
pub fn get_config_dir() -> Option<PathBuf> {
    // Try XDG config directory on Unix
    if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config).join("yulan"));
    }

    // Fallback to ~/.config/yulan
    if let Ok(home) = std::env::var("HOME") {
        return Some(PathBuf::from(home).join(".config").join("yulan"));
    }

    // On Windows, try %APPDATA%
    if let Ok(appdata) = std::env::var("APPDATA") {
        return Some(PathBuf::from(appdata).join("yulan"));
    }

    None
}

/// Get the user config file path (~/.config/yulan/config.toml)
pub fn get_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.toml"))
}

/// Load user-level configuration
/// Returns default config if file doesn't exist
pub fn load_user_config() -> Result<UserConfig, ConfigError> {
    match get_config_path() {
        Some(path) => load_config_from(&path),
        None => Ok(UserConfig::default()),
    }
}

/// Load configuration from a specific file, defaults if it doesn't exist
pub fn load_config_from(path: &Path) -> Result<UserConfig, ConfigError> {
    if !path.exists() {
        debug!("no config at {}, using defaults", path.display());
        return Ok(UserConfig::default());
    }

    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Load user-level config, creating default if not exists
pub fn load_or_create_user_config() -> Result<(UserConfig, PathBuf), ConfigError> {
    let path = get_config_path().ok_or(ConfigError::NoConfigDir)?;

    if !path.exists() {
        let config = UserConfig::default();
        save_config_to(&path, &config)?;
        return Ok((config, path));
    }

    Ok((load_config_from(&path)?, path))
}

/// Save user-level configuration
pub fn save_user_config(config: &UserConfig) -> Result<PathBuf, ConfigError> {
    let path = get_config_path().ok_or(ConfigError::NoConfigDir)?;
    save_config_to(&path, config)?;
    Ok(path)
}

/// Save configuration to a specific file, creating parent directories
pub fn save_config_to(
    path: &Path,
    config: &UserConfig,
) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        if !dir.exists() {
            fs::create_dir_all(dir)?;
        }
    }

    let content = toml::to_string_pretty(config)?;
    fs::write(path, content)?;

    Ok(())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Config serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Cannot determine config directory")]
    NoConfigDir,
}
