//! Service configuration loaded from TOML
//!
//! Every section implements `Default` with the values in [`super::defaults`],
//! so a missing file, section or key behaves exactly like the built-ins.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "POLICITY_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "policity.toml";

/// Environment variable holding the reasoning service API key.
pub const API_KEY_ENV: &str = "GOOGLE_API_KEY";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration.
///
/// Load with `ServiceConfig::load()` which searches:
/// 1. `$POLICITY_CONFIG` env var
/// 2. `./policity.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub geocoder: GeocoderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Load configuration using the standard search order, then apply
    /// environment overrides.
    pub fn load() -> Self {
        let mut config = Self::discover();
        config.apply_env_overrides();
        config
    }

    fn discover() -> Self {
        // 1. Explicit path
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from {CONFIG_ENV}");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {CONFIG_ENV}, falling back");
                    }
                }
            } else {
                warn!(path = %path, "{CONFIG_ENV} points to non-existent file, falling back");
            }
        }

        // 2. Working directory
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./{LOCAL_CONFIG_FILE}");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{LOCAL_CONFIG_FILE}, using defaults");
                }
            }
        }

        // 3. Defaults
        info!("No {LOCAL_CONFIG_FILE} found, using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config = Self::from_toml_str(&contents).map_err(|e| match e {
            ConfigError::Parse(_, inner) => ConfigError::Parse(path.to_path_buf(), inner),
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// `POLICITY_BIND_ADDRESS` and `POLICITY_DATA_DIR` win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("POLICITY_BIND_ADDRESS") {
            if !addr.trim().is_empty() {
                self.server.bind_address = addr;
            }
        }
        if let Ok(dir) = std::env::var("POLICITY_DATA_DIR") {
            if !dir.trim().is_empty() {
                self.storage.data_dir = PathBuf::from(dir);
            }
        }
    }

    /// Check values for internal consistency, collecting every problem.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.server.bind_address.trim().is_empty() {
            errors.push("server.bind_address must not be empty".to_string());
        }
        if self.server.max_body_bytes == 0 {
            errors.push("server.max_body_bytes must be > 0".to_string());
        }
        if self.storage.retention_days == 0 {
            errors.push("storage.retention_days must be > 0".to_string());
        }
        if self.storage.retention_sweep_secs == 0 {
            errors.push("storage.retention_sweep_secs must be > 0".to_string());
        }
        if self.pipeline.status_poll_interval_ms == 0 {
            errors.push("pipeline.status_poll_interval_ms must be > 0".to_string());
        }
        if self.pipeline.stale_run_secs == 0 {
            errors.push("pipeline.stale_run_secs must be > 0".to_string());
        }
        if !(0.0..=2.0).contains(&self.reasoning.temperature) {
            errors.push(format!(
                "reasoning.temperature ({:.2}) must be within 0.0..=2.0",
                self.reasoning.temperature
            ));
        }
        if self.reasoning.timeout_secs == 0 {
            errors.push("reasoning.timeout_secs must be > 0".to_string());
        }
        if self.reasoning.model.trim().is_empty() {
            errors.push("reasoning.model must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, #[source] toml::de::Error),
    #[error("Config serialization error: {0}")]
    Serialize(#[source] toml::ser::Error),
    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Can be overridden by `POLICITY_BIND_ADDRESS` or `--addr`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind_address() -> String {
    defaults::SERVER_ADDR.to_string()
}
const fn default_max_body_bytes() -> usize {
    defaults::MAX_BODY_BYTES
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default = "default_retention_sweep_secs")]
    pub retention_sweep_secs: u64,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(defaults::DATA_DIR)
}
const fn default_retention_days() -> u32 {
    defaults::RETENTION_DAYS
}
const fn default_retention_sweep_secs() -> u64 {
    defaults::RETENTION_SWEEP_SECS
}

impl StorageConfig {
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }

    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention_sweep_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            retention_days: default_retention_days(),
            retention_sweep_secs: default_retention_sweep_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Re-read interval for status subscriptions.
    #[serde(default = "default_status_poll_interval_ms")]
    pub status_poll_interval_ms: u64,
    /// Heartbeat age after which a running incident counts as abandoned.
    #[serde(default = "default_stale_run_secs")]
    pub stale_run_secs: u64,
}

const fn default_status_poll_interval_ms() -> u64 {
    defaults::STATUS_POLL_INTERVAL_MS
}
const fn default_stale_run_secs() -> u64 {
    defaults::STALE_RUN_SECS
}

impl PipelineConfig {
    pub const fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn stale_after(&self) -> chrono::Duration {
        i64::try_from(self.stale_run_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            status_poll_interval_ms: default_status_poll_interval_ms(),
            stale_run_secs: default_stale_run_secs(),
        }
    }
}

/// Which reasoning backend the stages use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningProvider {
    /// Google generative language API.
    Gemini,
    /// Deterministic offline payloads.
    Template,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    #[serde(default = "default_provider")]
    pub provider: ReasoningProvider,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

const fn default_provider() -> ReasoningProvider {
    ReasoningProvider::Gemini
}
fn default_model() -> String {
    defaults::REASONING_MODEL.to_string()
}
fn default_api_base() -> String {
    defaults::REASONING_API_BASE.to_string()
}
const fn default_timeout_secs() -> u64 {
    defaults::HTTP_TIMEOUT_SECS
}
const fn default_temperature() -> f32 {
    defaults::REASONING_TEMPERATURE
}

impl ReasoningConfig {
    /// API key from the environment; never read from the config file.
    pub fn api_key() -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_base: default_api_base(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_geocoder_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

const fn default_true() -> bool {
    true
}
fn default_geocoder_url() -> String {
    defaults::GEOCODER_BASE_URL.to_string()
}
fn default_user_agent() -> String {
    defaults::GEOCODER_USER_AGENT.to_string()
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_geocoder_url(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}
const fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
