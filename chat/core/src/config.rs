//! TOML Configuration File Support
//!
//! Centralized configuration loading for the chat client, supporting a TOML
//! file at `~/.config/ollama-chat/config.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [backend]
//! base_url = "http://localhost:11434"   # or a relay, e.g. "http://localhost:3001"
//! connect_timeout_ms = 30000
//! probe_timeout_ms = 5000
//!
//! [retry]
//! max_retries = 3
//! initial_backoff_ms = 1000
//! max_backoff_ms = 30000
//! backoff_multiplier = 2.0
//! use_jitter = false
//!
//! [chat]
//! default_model = "llama3.2"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::ollama::{DEFAULT_BASE_URL, DEFAULT_CONNECT_TIMEOUT, PROBE_TIMEOUT};
use crate::backend::RetryPolicy;

// =============================================================================
// Error Types
// =============================================================================

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

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
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
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Backend section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendToml {
    /// Base URL of the model server or relay
    pub base_url: Option<String>,

    /// Per-attempt connection deadline in milliseconds
    pub connect_timeout_ms: Option<u64>,

    /// Status probe timeout in milliseconds
    pub probe_timeout_ms: Option<u64>,
}

/// Retry section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryToml {
    /// Retries after the first failed connection attempt
    pub max_retries: Option<u32>,

    /// First backoff delay in milliseconds
    pub initial_backoff_ms: Option<u64>,

    /// Upper bound on any single backoff delay
    pub max_backoff_ms: Option<u64>,

    /// Growth factor between delays
    pub backoff_multiplier: Option<f32>,

    /// Whether to add jitter
    pub use_jitter: Option<bool>,
}

/// Chat section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatToml {
    /// Model to select after the first refresh
    pub default_model: Option<String>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigToml {
    /// Backend configuration section
    pub backend: BackendToml,

    /// Retry configuration section
    pub retry: RetryToml,

    /// Chat configuration section
    pub chat: ChatToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved configuration for the chat client
#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// Base URL of the model server or relay
    pub base_url: String,

    /// Per-attempt connection deadline
    pub connect_timeout: Duration,

    /// Status probe timeout
    pub probe_timeout: Duration,

    /// Connection retry schedule
    pub retry: RetryPolicy,

    /// Preferred model
    pub default_model: Option<String>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            probe_timeout: PROBE_TIMEOUT,
            retry: RetryPolicy::default(),
            default_model: None,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ChatConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check values that would otherwise fail at request time
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] describing the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "base_url must start with http:// or https://, got '{}'",
                self.base_url
            )));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::ValidationError(format!(
                "retry.backoff_multiplier must be at least 1.0, got {}",
                self.retry.backoff_multiplier
            )));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "backend.connect_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/ollama-chat/config.toml` or
/// `~/.config/ollama-chat/config.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ollama-chat").join("config.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed. A missing
/// config file is not an error. Call [`ChatConfig::validate`] once CLI
/// overrides have been applied.
pub fn load_config() -> Result<ChatConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ChatConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration using `env` to look up environment variables
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<ChatConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = ChatConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ConfigToml = toml::from_str(&toml_content)?;
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

    apply_env_config(&mut config, env);

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ChatConfig, toml: &ConfigToml) {
    if let Some(ref url) = toml.backend.base_url {
        config.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(ms) = toml.backend.connect_timeout_ms {
        config.connect_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.backend.probe_timeout_ms {
        config.probe_timeout = Duration::from_millis(ms);
    }

    if let Some(n) = toml.retry.max_retries {
        config.retry.max_retries = n;
    }
    if let Some(ms) = toml.retry.initial_backoff_ms {
        config.retry.initial_backoff_ms = ms;
    }
    if let Some(ms) = toml.retry.max_backoff_ms {
        config.retry.max_backoff_ms = ms;
    }
    if let Some(m) = toml.retry.backoff_multiplier {
        config.retry.backoff_multiplier = m;
    }
    if let Some(jitter) = toml.retry.use_jitter {
        config.retry.use_jitter = jitter;
    }

    if toml.chat.default_model.is_some() {
        config.default_model = toml.chat.default_model.clone();
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut ChatConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = env("OLLAMA_CHAT_BASE_URL") {
        config.base_url = url.trim_end_matches('/').to_string();
        config.source = ConfigSource::Env;
    } else if env("OLLAMA_HOST").is_some() || env("OLLAMA_PORT").is_some() {
        let host = env("OLLAMA_HOST").unwrap_or_else(|| "localhost".to_string());
        let port: u16 = env("OLLAMA_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434);
        config.base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("http://{host}:{port}")
        };
        config.source = ConfigSource::Env;
    }

    if let Some(model) = env("OLLAMA_CHAT_MODEL") {
        config.default_model = Some(model);
        config.source = ConfigSource::Env;
    }
    if let Some(timeout) = env("OLLAMA_CHAT_CONNECT_TIMEOUT") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.connect_timeout = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(retries) = env("OLLAMA_CHAT_MAX_RETRIES") {
        if let Ok(n) = retries.parse::<u32>() {
            config.retry.max_retries = n;
            config.source = ConfigSource::Env;
        }
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Base URL override
    pub base_url: Option<String>,

    /// Default model override
    pub default_model: Option<String>,

    /// Connect timeout override (milliseconds)
    pub connect_timeout_ms: Option<u64>,

    /// Max retries override
    pub max_retries: Option<u32>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set base URL override
    #[must_use]
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = Some(url);
        self
    }

    /// Set default model override
    #[must_use]
    pub fn with_default_model(mut self, model: String) -> Self {
        self.default_model = Some(model);
        self
    }

    /// Set connect timeout override
    #[must_use]
    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = Some(ms);
        self
    }

    /// Set max retries override
    #[must_use]
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ChatConfig) {
        if self.base_url.is_some()
            || self.default_model.is_some()
            || self.connect_timeout_ms.is_some()
            || self.max_retries.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref url) = self.base_url {
            config.base_url = url.trim_end_matches('/').to_string();
        }

        if let Some(ref model) = self.default_model {
            config.default_model = Some(model.clone());
        }

        if let Some(ms) = self.connect_timeout_ms {
            config.connect_timeout = Duration::from_millis(ms);
        }

        if let Some(n) = self.max_retries {
            config.retry.max_retries = n;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
