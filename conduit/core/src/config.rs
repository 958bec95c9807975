//! TOML configuration file support.
//!
//! Centralized configuration loading for the pipeline, supporting a TOML
//! file at `~/.config/conduit/conduit.toml`.
//!
//! # Configuration Priority
//!
//! Values are loaded with the following priority (highest first):
//! 1. Environment variables (`CONDUIT_*`)
//! 2. TOML configuration file
//! 3. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [pipeline]
//! chunk_timeout_ms = 30000
//! retention_window_ms = 300000
//!
//! [buffer]
//! enabled = true
//! max_chunks = 16
//! max_bytes = 32768
//! max_wait_ms = 100
//!
//! [filter]
//! redact_cards = true
//! redact_emails = true
//! filter_profanity = false
//!
//! [limits]
//! max_concurrent_streams = 32
//! max_prompt_bytes = 102400
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::buffer::BufferConfig;
use crate::filter::FilterConfig;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// ============================================================================
// Configuration Source Tracking
// ============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// ============================================================================
// TOML Configuration Structures
// ============================================================================

/// Pipeline timing section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineToml {
    /// Per-chunk producer deadline in milliseconds
    pub chunk_timeout_ms: Option<u64>,

    /// How long terminal streams stay queryable, in milliseconds
    pub retention_window_ms: Option<u64>,
}

/// Buffering section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferToml {
    /// Whether batching is enabled
    pub enabled: Option<bool>,

    /// Flush threshold on buffered chunk count
    pub max_chunks: Option<usize>,

    /// Flush threshold on buffered text bytes
    pub max_bytes: Option<usize>,

    /// Flush threshold on oldest-chunk age in milliseconds
    pub max_wait_ms: Option<u64>,
}

/// Content filter section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterToml {
    /// Redact payment-card-like sequences
    pub redact_cards: Option<bool>,

    /// Redact email-like strings
    pub redact_emails: Option<bool>,

    /// Substitute coarse profanity
    pub filter_profanity: Option<bool>,
}

/// Limits section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsToml {
    /// Maximum concurrently tracked non-terminal streams
    pub max_concurrent_streams: Option<usize>,

    /// Maximum request prompt size in bytes
    pub max_prompt_bytes: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConduitToml {
    /// Pipeline timing section
    pub pipeline: PipelineToml,

    /// Buffering section
    pub buffer: BufferToml,

    /// Content filter section
    pub filter: FilterToml,

    /// Limits section
    pub limits: LimitsToml,
}

// ============================================================================
// Runtime Limits
// ============================================================================

/// Hard limits applied before a stream is registered
#[derive(Clone, Debug)]
pub struct LimitsConfig {
    /// Maximum concurrently tracked non-terminal streams
    pub max_concurrent_streams: usize,
    /// Maximum request prompt size in bytes
    pub max_prompt_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_streams: 32,
            max_prompt_bytes: 100 * 1024,
        }
    }
}

// ============================================================================
// Main Configuration Struct
// ============================================================================

/// Complete configuration for the streaming pipeline
///
/// Use [`load_config`] to populate this with proper priority handling, or
/// build it directly for embedded/test use.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Buffering thresholds
    pub buffer: BufferConfig,

    /// Content filter rules
    pub filter: FilterConfig,

    /// Creation-time limits
    pub limits: LimitsConfig,

    /// Per-chunk producer deadline
    pub chunk_timeout: Duration,

    /// How long terminal streams stay queryable before purge
    pub retention_window: Duration,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer: BufferConfig::default(),
            filter: FilterConfig::default(),
            limits: LimitsConfig::default(),
            chunk_timeout: Duration::from_secs(30),
            retention_window: Duration::from_secs(300),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl PipelineConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check every value for internal consistency
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer.enabled {
            if self.buffer.max_chunks == 0 {
                return Err(ConfigError::ValidationError(
                    "buffer.max_chunks must be at least 1 when buffering is enabled".to_string(),
                ));
            }
            if self.buffer.max_bytes == 0 {
                return Err(ConfigError::ValidationError(
                    "buffer.max_bytes must be at least 1 when buffering is enabled".to_string(),
                ));
            }
            if self.buffer.max_wait.is_zero() {
                return Err(ConfigError::ValidationError(
                    "buffer.max_wait_ms must be nonzero when buffering is enabled".to_string(),
                ));
            }
        }
        if self.chunk_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "pipeline.chunk_timeout_ms must be nonzero".to_string(),
            ));
        }
        if self.limits.max_concurrent_streams == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_concurrent_streams must be at least 1".to_string(),
            ));
        }
        if self.limits.max_prompt_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "limits.max_prompt_bytes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Configuration Loading
// ============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/conduit/conduit.toml` or
/// `~/.config/conduit/conduit.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("conduit").join("conduit.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or if
/// the resolved values fail validation. A missing config file is not an
/// error (defaults are used).
pub fn load_config() -> Result<PipelineConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only
///   defaults and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the resolved values fail validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<PipelineConfig, ConfigError> {
    // Start with defaults
    let mut config = PipelineConfig::default();

    // Try to load from file
    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ConduitToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    // Apply environment variables (overrides file values)
    apply_env_config(&mut config);

    config.validate()?;
    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut PipelineConfig, toml: &ConduitToml) {
    // Pipeline timing
    if let Some(ms) = toml.pipeline.chunk_timeout_ms {
        config.chunk_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.pipeline.retention_window_ms {
        config.retention_window = Duration::from_millis(ms);
    }

    // Buffering
    if let Some(enabled) = toml.buffer.enabled {
        config.buffer.enabled = enabled;
    }
    if let Some(chunks) = toml.buffer.max_chunks {
        config.buffer.max_chunks = chunks;
    }
    if let Some(bytes) = toml.buffer.max_bytes {
        config.buffer.max_bytes = bytes;
    }
    if let Some(ms) = toml.buffer.max_wait_ms {
        config.buffer.max_wait = Duration::from_millis(ms);
    }

    // Filter rules
    if let Some(enabled) = toml.filter.redact_cards {
        config.filter.redact_cards = enabled;
    }
    if let Some(enabled) = toml.filter.redact_emails {
        config.filter.redact_emails = enabled;
    }
    if let Some(enabled) = toml.filter.filter_profanity {
        config.filter.filter_profanity = enabled;
    }

    // Limits
    if let Some(n) = toml.limits.max_concurrent_streams {
        config.limits.max_concurrent_streams = n;
    }
    if let Some(bytes) = toml.limits.max_prompt_bytes {
        config.limits.max_prompt_bytes = bytes;
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config(config: &mut PipelineConfig) {
    // Pipeline timing from environment
    if let Ok(value) = std::env::var("CONDUIT_CHUNK_TIMEOUT_MS") {
        match value.parse::<u64>() {
            Ok(ms) => {
                config.chunk_timeout = Duration::from_millis(ms);
                config.source = ConfigSource::Env;
            }
            Err(_) => tracing::warn!(
                value = %value,
                "Ignoring unparseable CONDUIT_CHUNK_TIMEOUT_MS"
            ),
        }
    }
    if let Ok(value) = std::env::var("CONDUIT_RETENTION_WINDOW_MS") {
        match value.parse::<u64>() {
            Ok(ms) => {
                config.retention_window = Duration::from_millis(ms);
                config.source = ConfigSource::Env;
            }
            Err(_) => tracing::warn!(
                value = %value,
                "Ignoring unparseable CONDUIT_RETENTION_WINDOW_MS"
            ),
        }
    }

    // Buffering from environment
    if let Ok(value) = std::env::var("CONDUIT_BUFFER_ENABLED") {
        config.buffer.enabled = parse_env_bool(&value);
        config.source = ConfigSource::Env;
    }
    if let Ok(value) = std::env::var("CONDUIT_BUFFER_MAX_CHUNKS") {
        match value.parse::<usize>() {
            Ok(n) => {
                config.buffer.max_chunks = n;
                config.source = ConfigSource::Env;
            }
            Err(_) => tracing::warn!(
                value = %value,
                "Ignoring unparseable CONDUIT_BUFFER_MAX_CHUNKS"
            ),
        }
    }
    if let Ok(value) = std::env::var("CONDUIT_BUFFER_MAX_BYTES") {
        match value.parse::<usize>() {
            Ok(n) => {
                config.buffer.max_bytes = n;
                config.source = ConfigSource::Env;
            }
            Err(_) => tracing::warn!(
                value = %value,
                "Ignoring unparseable CONDUIT_BUFFER_MAX_BYTES"
            ),
        }
    }
    if let Ok(value) = std::env::var("CONDUIT_BUFFER_MAX_WAIT_MS") {
        match value.parse::<u64>() {
            Ok(ms) => {
                config.buffer.max_wait = Duration::from_millis(ms);
                config.source = ConfigSource::Env;
            }
            Err(_) => tracing::warn!(
                value = %value,
                "Ignoring unparseable CONDUIT_BUFFER_MAX_WAIT_MS"
            ),
        }
    }

    // Filter rules from environment
    if let Ok(value) = std::env::var("CONDUIT_REDACT_CARDS") {
        config.filter.redact_cards = parse_env_bool(&value);
        config.source = ConfigSource::Env;
    }
    if let Ok(value) = std::env::var("CONDUIT_REDACT_EMAILS") {
        config.filter.redact_emails = parse_env_bool(&value);
        config.source = ConfigSource::Env;
    }
    if let Ok(value) = std::env::var("CONDUIT_FILTER_PROFANITY") {
        config.filter.filter_profanity = parse_env_bool(&value);
        config.source = ConfigSource::Env;
    }

    // Limits from environment
    if let Ok(value) = std::env::var("CONDUIT_MAX_CONCURRENT_STREAMS") {
        match value.parse::<usize>() {
            Ok(n) => {
                config.limits.max_concurrent_streams = n;
                config.source = ConfigSource::Env;
            }
            Err(_) => tracing::warn!(
                value = %value,
                "Ignoring unparseable CONDUIT_MAX_CONCURRENT_STREAMS"
            ),
        }
    }
    if let Ok(value) = std::env::var("CONDUIT_MAX_PROMPT_BYTES") {
        match value.parse::<usize>() {
            Ok(n) => {
                config.limits.max_prompt_bytes = n;
                config.source = ConfigSource::Env;
            }
            Err(_) => tracing::warn!(
                value = %value,
                "Ignoring unparseable CONDUIT_MAX_PROMPT_BYTES"
            ),
        }
    }
}

fn parse_env_bool(value: &str) -> bool {
    value != "0" && value.to_lowercase() != "false"
}
