use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::validate_enum;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,

    #[serde(default)]
    pub engine: EngineSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub route: Vec<RouteEntry>,
}

/// General daemon settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Static image shown when a clip is terminally unavailable
    #[serde(default)]
    pub fallback_image: Option<String>,

    /// Route considered active before the first navigation
    #[serde(default = "default_boot_route")]
    pub boot_route: String,

    /// Variant active at startup ("normal" or "uv")
    #[serde(default = "default_boot_variant")]
    pub boot_variant: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            fallback_image: None,
            boot_route: default_boot_route(),
            boot_variant: default_boot_variant(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_boot_route() -> String {
    "/".to_string()
}
fn default_boot_variant() -> String {
    "normal".to_string()
}

/// Transition engine timing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSettings {
    /// Upper bound on how long a session may stay in Preparing/Playing
    /// before completion is forced
    #[serde(default = "default_safety_timeout")]
    pub safety_timeout_ms: u64,

    /// Bound on a single preload warm-up; expiry counts as success
    #[serde(default = "default_preload_timeout")]
    pub preload_timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            safety_timeout_ms: default_safety_timeout(),
            preload_timeout_ms: default_preload_timeout(),
        }
    }
}

fn default_safety_timeout() -> u64 {
    8000
}
fn default_preload_timeout() -> u64 {
    4000
}

/// Retry policy applied to probe, preload and source-swap failures
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrySettings {
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    #[serde(default = "default_retry_delay")]
    pub delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_ms: default_retry_delay(),
        }
    }
}

fn default_attempts() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    250
}

/// Clip storage settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheSettings {
    /// Base directory that relative clip URLs resolve against
    #[serde(default = "default_media_root")]
    pub media_root: String,

    /// Optional directory clips are opportunistically copied into during
    /// preload; unset disables persistence without being an error
    #[serde(default)]
    pub cache_dir: Option<String>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            media_root: default_media_root(),
            cache_dir: None,
        }
    }
}

fn default_media_root() -> String {
    "~/.local/share/backdrop".to_string()
}

/// One route of the site and its two clip variants
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteEntry {
    /// Route path (e.g., "/", "/gallery")
    pub path: String,

    /// Clip URL for the normal variant, relative to media_root
    pub normal: String,

    /// Clip URL for the UV variant, relative to media_root
    pub uv: String,
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!(
                "Config file not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded configuration from {}", path.display());
        config.validate()?;

        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("backdrop");

        Ok(config_dir.join("config.toml"))
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        match self.general.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Invalid log level: {}", self.general.log_level),
        }

        self.validate_variant(&self.general.boot_variant)?;

        if self.engine.safety_timeout_ms == 0 {
            anyhow::bail!("safety_timeout_ms must be greater than zero");
        }
        if self.retry.attempts == 0 {
            anyhow::bail!("retry attempts must be greater than zero");
        }

        for route in &self.route {
            if !route.path.starts_with('/') {
                anyhow::bail!("Route path must start with '/': {}", route.path);
            }
            if route.normal.is_empty() || route.uv.is_empty() {
                anyhow::bail!("Route {} must map both variants", route.path);
            }
        }

        Ok(())
    }

    fn validate_variant(&self, variant: &str) -> Result<()> {
        validate_enum!(variant, "normal", "uv")
    }

    /// Safety window for a transition session
    pub fn safety_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.safety_timeout_ms)
    }

    /// Bound on a single preload warm-up
    pub fn preload_timeout(&self) -> Duration {
        Duration::from_millis(self.engine.preload_timeout_ms)
    }

    /// Base directory for relative clip URLs, tilde-expanded
    pub fn media_root(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.cache.media_root).to_string())
    }

    /// Opportunistic persistence directory, tilde-expanded
    pub fn cache_dir(&self) -> Option<PathBuf> {
        self.cache
            .cache_dir
            .as_ref()
            .map(|d| PathBuf::from(shellexpand::tilde(d).to_string()))
    }
}
