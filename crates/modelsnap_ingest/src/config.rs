//! Configuration for the ingestion pipeline

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default receiver route on the upload host.
pub const DEFAULT_RECEIVER_PATH: &str = "WeatherForecast/ZipReceiver";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory watched for new model files
    #[serde(default = "default_watch_dir")]
    pub watch_dir: PathBuf,

    /// Root for per-model batch directories (snapshots + archive)
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Model file extension, without the dot
    #[serde(default = "default_extension")]
    pub extension: String,

    /// Token inserted before the extension once a file is processed
    #[serde(default = "default_marker")]
    pub marker: String,

    /// Full rescan interval in milliseconds
    #[serde(default = "default_rescan_interval_ms")]
    pub rescan_interval_ms: u64,

    /// Failed loads of unchanged contents before a file is skipped until it
    /// changes (0 = never skip)
    #[serde(default = "default_max_load_attempts")]
    pub max_load_attempts: u32,

    /// Snapshots per model
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// How long shutdown waits for in-flight batches
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Remove the batch directory once its archive was delivered
    #[serde(default)]
    pub cleanup_after_upload: bool,

    #[serde(default)]
    pub render: RenderConfig,

    #[serde(default)]
    pub placement: PlacementConfig,

    #[serde(default)]
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Square snapshot size in pixels
    #[serde(default = "default_resolution")]
    pub resolution: u32,
}

/// Where a loaded model sits in front of the camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementConfig {
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f32,
    #[serde(default = "default_distance")]
    pub distance: f32,
    #[serde(default = "default_vertical_offset")]
    pub vertical_offset: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Receiver `host:port`
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_receiver_path")]
    pub receiver_path: String,

    /// Full URL; overrides `host` and `receiver_path` when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Skip server certificate validation. Only for self-signed receivers.
    #[serde(default)]
    pub accept_invalid_certs: bool,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_watch_dir() -> PathBuf {
    modelsnap_logging::modelsnap_home().join("inbox")
}

fn default_work_dir() -> PathBuf {
    modelsnap_logging::modelsnap_home().join("batches")
}

fn default_extension() -> String {
    "obj".to_string()
}

fn default_marker() -> String {
    "_READED".to_string()
}

fn default_rescan_interval_ms() -> u64 {
    1000
}

fn default_max_load_attempts() -> u32 {
    5
}

fn default_batch_size() -> usize {
    3
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

fn default_resolution() -> u32 {
    256
}

fn default_scale_factor() -> f32 {
    0.7
}

fn default_distance() -> f32 {
    5.0
}

fn default_vertical_offset() -> f32 {
    -1.0
}

fn default_host() -> String {
    "127.0.0.1:7026".to_string()
}

fn default_receiver_path() -> String {
    DEFAULT_RECEIVER_PATH.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch_dir: default_watch_dir(),
            work_dir: default_work_dir(),
            extension: default_extension(),
            marker: default_marker(),
            rescan_interval_ms: default_rescan_interval_ms(),
            max_load_attempts: default_max_load_attempts(),
            batch_size: default_batch_size(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            cleanup_after_upload: false,
            render: RenderConfig::default(),
            placement: PlacementConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
        }
    }
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            scale_factor: default_scale_factor(),
            distance: default_distance(),
            vertical_offset: default_vertical_offset(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            receiver_path: default_receiver_path(),
            url: None,
            accept_invalid_certs: false,
            timeout_secs: default_timeout_secs(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.extension.trim_start_matches('.').is_empty() {
            return Err(ConfigError::Invalid("extension must not be empty".into()));
        }
        if self.marker.is_empty() {
            return Err(ConfigError::Invalid("marker must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.rescan_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "rescan_interval_ms must be at least 1".into(),
            ));
        }
        if self.render.resolution == 0 {
            return Err(ConfigError::Invalid("render.resolution must be positive".into()));
        }
        if self.upload.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "upload.retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Extension without a leading dot.
    pub fn extension(&self) -> &str {
        self.extension.trim_start_matches('.')
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl UploadConfig {
    /// Resolved receiver URL.
    pub fn endpoint_url(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!(
                "https://{}/{}",
                self.host.trim_end_matches('/'),
                self.receiver_path.trim_start_matches('/')
            ),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
