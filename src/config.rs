//! Environment-driven logger configuration.
//!
//! These are helpers for wiring a [`Logger`](crate::Logger) at startup; the
//! logger itself never reads the environment.

use crate::console::ConsoleFormat;
use crate::level::{ParseSeverityError, Severity};
use serde::{Deserialize, Serialize};

/// Minimum level, e.g. `Warning` or `debug`.
pub const STRUCTLOG_MIN_LEVEL_ENV: &str = "STRUCTLOG_MIN_LEVEL";

/// Default category of the root logger.
pub const STRUCTLOG_CATEGORY_ENV: &str = "STRUCTLOG_CATEGORY";

/// Console output: `text`, `json`, or `off`.
pub const STRUCTLOG_CONSOLE_ENV: &str = "STRUCTLOG_CONSOLE";

/// Maximum number of error links captured per record.
pub const STRUCTLOG_MAX_ERROR_DEPTH_ENV: &str = "STRUCTLOG_MAX_ERROR_DEPTH";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid {var}: {source}")]
    InvalidLevel {
        var: &'static str,
        #[source]
        source: ParseSeverityError,
    },
    #[error("invalid {var}: {value:?} (expected text, json or off)")]
    InvalidConsole { var: &'static str, value: String },
    #[error("invalid {var}: {value:?} is not a non-negative integer")]
    InvalidNumber { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    pub minimum_level: Severity,
    pub category: String,
    /// `None` disables the console sink.
    pub console: Option<ConsoleFormat>,
    pub max_error_depth: Option<usize>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            minimum_level: Severity::Information,
            category: "app".to_string(),
            console: Some(ConsoleFormat::Text),
            max_error_depth: None,
        }
    }
}

impl LoggerConfig {
    /// Defaults overridden by the `STRUCTLOG_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(level) = lookup(STRUCTLOG_MIN_LEVEL_ENV) {
            config.minimum_level = level.parse().map_err(|source| ConfigError::InvalidLevel {
                var: STRUCTLOG_MIN_LEVEL_ENV,
                source,
            })?;
        }
        if let Some(category) = lookup(STRUCTLOG_CATEGORY_ENV) {
            if !category.trim().is_empty() {
                config.category = category.trim().to_string();
            }
        }
        if let Some(console) = lookup(STRUCTLOG_CONSOLE_ENV) {
            config.console = match console.trim().to_ascii_lowercase().as_str() {
                "off" | "none" | "" => None,
                other => Some(other.parse().map_err(|_| ConfigError::InvalidConsole {
                    var: STRUCTLOG_CONSOLE_ENV,
                    value: console.clone(),
                })?),
            };
        }
        if let Some(depth) = lookup(STRUCTLOG_MAX_ERROR_DEPTH_ENV) {
            let parsed = depth.trim().parse::<usize>().map_err(|_| ConfigError::InvalidNumber {
                var: STRUCTLOG_MAX_ERROR_DEPTH_ENV,
                value: depth.clone(),
            })?;
            config.max_error_depth = Some(parsed);
        }

        Ok(config)
    }
}
