//! Configuration management for the Stashbot daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/stashbot/config.toml`.
//! Secrets usually arrive through the environment instead of the file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bot token.
pub const ENV_TOKEN: &str = "TELEGRAM_TOKEN";
/// Authorized chat id.
pub const ENV_CHAT_ID: &str = "TELEGRAM_CHATID";
/// Root directory for saved files.
pub const ENV_ROOT_DIR: &str = "TELEGRAM_ROOT_DIR";
/// Log level.
pub const ENV_LOG_LEVEL: &str = "STASHBOT_LOG_LEVEL";

/// Longest long-poll timeout accepted by the Bot API.
const MAX_POLL_TIMEOUT_SECS: u64 = 50;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("bot token is missing; set TELEGRAM_TOKEN or bot.token")]
    MissingToken,

    #[error("TELEGRAM_CHATID must be an integer chat id, got {0:?}")]
    InvalidChatId(String),

    #[error("temp_suffix must be non-empty and contain no path separator, got {0:?}")]
    InvalidTempSuffix(String),

    #[error("progress_interval must be greater than 0, got {0}")]
    InvalidProgressInterval(u64),

    #[error("poll_timeout_secs must be at most 50, got {0}")]
    InvalidPollTimeout(u64),

    #[error("api_url must start with http:// or https://, got {0}")]
    InvalidApiUrl(String),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the Stashbot daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Bot API connection.
    pub bot: BotConfig,

    /// Where files are stored.
    pub storage: StorageConfig,

    /// Download behavior.
    pub download: DownloadConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Also write logs to this file, rotated daily.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

/// Bot API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BotConfig {
    /// Bot token. Prefer the environment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Base URL of the Bot API.
    pub api_url: String,

    /// Long-poll timeout for `getUpdates`.
    pub poll_timeout_secs: u64,

    /// Only this chat is served when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorized_chat_id: Option<i64>,
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory. Defaults to the process working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root_dir: Option<PathBuf>,

    /// Suffix of in-progress files.
    pub temp_suffix: String,

    /// Include dot-files in `/ls` listings.
    pub list_hidden: bool,
}

/// Download settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DownloadConfig {
    /// Maximum active transfers (0 = unbounded).
    pub max_concurrent: usize,

    /// Report progress whenever the pending count is a multiple of this.
    pub progress_interval: u64,

    /// Seconds to wait for in-flight downloads on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: "https://api.telegram.org".to_string(),
            poll_timeout_secs: 10,
            authorized_chat_id: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: None,
            temp_suffix: ".tmp".to_string(),
            list_hidden: true,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 0,
            progress_interval: 5,
            shutdown_grace_secs: 30,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stashbot")
        .join("config.toml")
}

/// Read a variable and remove it from the process environment.
///
/// Empty values count as unset.
fn take_env(key: &str) -> Option<String> {
    let value = std::env::var(key).ok();
    std::env::remove_var(key);
    value.filter(|v| !v.is_empty())
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values and
    /// are erased after being read. Supported variables:
    /// - TELEGRAM_TOKEN: bot token
    /// - TELEGRAM_CHATID: authorized chat id (must be an integer)
    /// - TELEGRAM_ROOT_DIR: root directory
    /// - STASHBOT_LOG_LEVEL: log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(token) = take_env(ENV_TOKEN) {
            tracing::info!("Using bot token from environment");
            self.bot.token = Some(token);
        }

        if let Some(chat_id) = take_env(ENV_CHAT_ID) {
            let id = chat_id
                .trim()
                .parse::<i64>()
                .map_err(|_| ConfigError::InvalidChatId(chat_id.clone()))?;
            tracing::info!("Overriding authorized_chat_id from environment: {}", id);
            self.bot.authorized_chat_id = Some(id);
        }

        if let Some(root) = take_env(ENV_ROOT_DIR) {
            tracing::info!("Overriding root_dir from environment: {}", root);
            self.storage.root_dir = Some(PathBuf::from(root));
        }

        if let Some(level) = take_env(ENV_LOG_LEVEL) {
            tracing::info!("Overriding log_level from environment: {}", level);
            self.daemon.log_level = level;
        }

        Ok(())
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if a required value is missing or out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.bot.token.as_deref() {
            Some(token) if !token.trim().is_empty() => {}
            _ => return Err(ConfigError::MissingToken),
        }

        let url = &self.bot.api_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::InvalidApiUrl(url.clone()));
        }

        if self.bot.poll_timeout_secs > MAX_POLL_TIMEOUT_SECS {
            return Err(ConfigError::InvalidPollTimeout(self.bot.poll_timeout_secs));
        }

        let suffix = &self.storage.temp_suffix;
        if suffix.is_empty() || suffix.chars().any(std::path::is_separator) {
            return Err(ConfigError::InvalidTempSuffix(suffix.clone()));
        }

        if self.download.progress_interval == 0 {
            return Err(ConfigError::InvalidProgressInterval(
                self.download.progress_interval,
            ));
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// The configured root, or the process working directory.
    pub fn root_dir(&self) -> Result<PathBuf> {
        match &self.storage.root_dir {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir().context("Failed to determine working directory"),
        }
    }

    /// A copy safe to print, with the token masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.bot.token.is_some() {
            copy.bot.token = Some("<redacted>".to_string());
        }
        copy
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
