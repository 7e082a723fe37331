//! Configuration file parser for brook.toml.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! Environment variables override file values. Unknown keys are ignored by
//! serde, though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::feed::{RefreshSettings, DEFAULT_MAX_BODY_SIZE};
use crate::fetcher::DEFAULT_TIMEOUT_SECS;
use crate::scheduler::{ProbabilityModel, SchedulerKind};
use crate::script::ScriptLimits;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level daemon configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file.
    pub database_path: String,

    /// Minutes between two checks of the same feed.
    pub polling_frequency: u64,

    /// Maximum number of feeds per refresh cycle.
    pub batch_size: usize,

    /// Concurrent refreshes within a cycle.
    pub worker_pool_size: usize,

    /// Consecutive failures after which a feed leaves automatic batches.
    pub polling_parsing_error_limit: i64,

    pub polling_scheduler: SchedulerKind,

    /// Default user agent for feeds without their own.
    pub http_client_user_agent: String,

    /// Request timeout in seconds. 0 = no timeout.
    pub http_client_timeout: u64,

    /// Maximum response body size in bytes.
    pub http_client_max_body_size: usize,

    /// Privacy-friendly YouTube frontend trusted for embeds.
    pub invidious_instance: Option<String>,

    pub probability: ProbabilityModel,

    pub script: ScriptLimits,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "brook.db".to_string(),
            polling_frequency: 60,
            batch_size: 100,
            worker_pool_size: 16,
            polling_parsing_error_limit: 3,
            polling_scheduler: SchedulerKind::default(),
            http_client_user_agent: format!("brook/{}", env!("CARGO_PKG_VERSION")),
            http_client_timeout: DEFAULT_TIMEOUT_SECS,
            http_client_max_body_size: DEFAULT_MAX_BODY_SIZE,
            invidious_instance: None,
            probability: ProbabilityModel::default(),
            script: ScriptLimits::default(),
        }
    }
}

const KNOWN_KEYS: &[&str] = &[
    "database_path",
    "polling_frequency",
    "batch_size",
    "worker_pool_size",
    "polling_parsing_error_limit",
    "polling_scheduler",
    "http_client_user_agent",
    "http_client_timeout",
    "http_client_max_body_size",
    "invidious_instance",
    "probability",
    "script",
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check the size first so a huge file is never read into memory.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            scheduler = ?config.polling_scheduler,
            batch_size = config.batch_size,
            workers = config.worker_pool_size,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DATABASE_URL") {
            self.database_path = v;
        }
        if let Some(v) = get("POLLING_FREQUENCY") {
            self.polling_frequency = parse_env("POLLING_FREQUENCY", &v)?;
        }
        if let Some(v) = get("BATCH_SIZE") {
            self.batch_size = parse_env("BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("WORKER_POOL_SIZE") {
            self.worker_pool_size = parse_env("WORKER_POOL_SIZE", &v)?;
        }
        if let Some(v) = get("POLLING_PARSING_ERROR_LIMIT") {
            self.polling_parsing_error_limit = parse_env("POLLING_PARSING_ERROR_LIMIT", &v)?;
        }
        if let Some(v) = get("POLLING_SCHEDULER") {
            self.polling_scheduler = parse_env("POLLING_SCHEDULER", &v)?;
        }
        if let Some(v) = get("HTTP_CLIENT_USER_AGENT") {
            self.http_client_user_agent = v;
        }
        if let Some(v) = get("HTTP_CLIENT_TIMEOUT") {
            self.http_client_timeout = parse_env("HTTP_CLIENT_TIMEOUT", &v)?;
        }
        if let Some(v) = get("HTTP_CLIENT_MAX_BODY_SIZE") {
            self.http_client_max_body_size = parse_env("HTTP_CLIENT_MAX_BODY_SIZE", &v)?;
        }
        if let Some(v) = get("INVIDIOUS_INSTANCE") {
            self.invidious_instance = Some(v);
        }
        Ok(())
    }

    /// Reject values the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.worker_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "worker_pool_size must be at least 1".into(),
            ));
        }
        if self.polling_frequency == 0 {
            return Err(ConfigError::Invalid(
                "polling_frequency must be at least 1 minute".into(),
            ));
        }
        let model = &self.probability;
        if !(model.min_age_days > 0.0 && model.min_age_days <= model.max_age_days) {
            return Err(ConfigError::Invalid(format!(
                "probability age bounds must satisfy 0 < min ({}) <= max ({})",
                model.min_age_days, model.max_age_days
            )));
        }
        if model.growth_divisor.is_nan() || model.growth_divisor <= 0.0 {
            return Err(ConfigError::Invalid(
                "probability.growth_divisor must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Fetch settings for the refresh pipeline.
    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            user_agent: self.http_client_user_agent.clone(),
            timeout_secs: self.http_client_timeout,
            max_body_size: self.http_client_max_body_size,
            polling_frequency_minutes: self.polling_frequency,
            error_limit: self.polling_parsing_error_limit,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key,
        value: value.to_string(),
    })
}

// ============================================================================
// Tests
// ============================================================================
