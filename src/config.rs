//! TOML configuration. Every key is optional; a missing file means defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FilterError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default)]
    pub theme: ThemeConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: Logging,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    #[serde(default = "default_media_host_pattern")]
    pub media_host_pattern: String,
    #[serde(default = "default_min_media_px")]
    pub min_media_px: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsConfig {
    #[serde(default = "default_save_interval_ms")]
    pub save_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeConfig {
    #[serde(default = "default_theme_cache_ms")]
    pub cache_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Defaults to `<data_dir>/feedguard/storage.json`.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Logging {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_ms: default_cache_ttl_ms(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_delay_ms: default_batch_delay_ms(),
            concurrency: default_concurrency(),
            frame_interval_ms: default_frame_interval_ms(),
            media_host_pattern: default_media_host_pattern(),
            min_media_px: default_min_media_px(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            save_interval_ms: default_save_interval_ms(),
        }
    }
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            cache_ms: default_theme_cache_ms(),
        }
    }
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Defaults
fn default_base_url() -> String {
    crate::classify::http::DEFAULT_BASE_URL.to_string()
}
fn default_cache_capacity() -> usize {
    crate::cache::DEFAULT_CAPACITY
}
fn default_cache_ttl_ms() -> u64 {
    crate::cache::DEFAULT_TTL.as_millis() as u64
}
fn default_batch_delay_ms() -> u64 {
    crate::scheduler::DEFAULT_BATCH_DELAY.as_millis() as u64
}
fn default_concurrency() -> usize {
    crate::dispatch::DEFAULT_CONCURRENCY
}
fn default_frame_interval_ms() -> u64 {
    crate::observer::DEFAULT_FRAME_INTERVAL.as_millis() as u64
}
fn default_media_host_pattern() -> String {
    crate::observer::DEFAULT_MEDIA_HOST_PATTERN.to_string()
}
fn default_min_media_px() -> u32 {
    crate::observer::DEFAULT_MIN_MEDIA_PX
}
fn default_save_interval_ms() -> u64 {
    crate::stats::DEFAULT_SAVE_INTERVAL.as_millis() as u64
}
fn default_theme_cache_ms() -> u64 {
    crate::theme::DEFAULT_THEME_CACHE.as_millis() as u64
}
fn default_log_level() -> String {
    "info".to_string()
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl PipelineConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl StatsConfig {
    pub fn save_interval(&self) -> Duration {
        Duration::from_millis(self.save_interval_ms)
    }
}

impl ThemeConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ms)
    }
}

impl StorageConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("feedguard")
                .join("storage.json")
        })
    }
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self, FilterError> {
        Ok(toml::from_str(content)?)
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("feedguard").join("config.toml"))
}

/// Load `explicit`, or the default config path. A missing file yields
/// defaults; a file that does not parse is an error.
pub fn load_config(explicit: Option<&Path>) -> Result<Config, FilterError> {
    let path = match explicit.map(Path::to_path_buf).or_else(default_config_path) {
        Some(path) => path,
        None => return Ok(Config::default()),
    };
    if !path.exists() {
        if explicit.is_some() {
            return Err(FilterError::Config(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        debug!(path = %path.display(), "no config file, using defaults");
        return Ok(Config::default());
    }
    let content = fs::read_to_string(&path)?;
    Config::from_toml(&content)
}
