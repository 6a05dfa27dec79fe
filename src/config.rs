//! # Configuration Management Module
//!
//! ## Purpose
//! Centralized configuration for the case retrieval pipeline: API endpoint and
//! credential, retry and pacing policy, and the RECAP poll schedule. All state
//! is carried by an explicit `Config` value passed into constructors; there is
//! no process-wide mutable configuration.
//!
//! ## Input/Output Specification
//! - **Input**: Configuration files (TOML), environment variables
//! - **Output**: Validated configuration structs with defaults and overrides
//!
//! ## Configuration Sources (in order of precedence)
//! 1. Environment variables
//! 2. Configuration file
//! 3. Default values

use crate::errors::{FetchError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure containing all pipeline settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// CourtListener API settings
    pub api: ApiConfig,
    /// Retry and back-off policy
    pub retry: RetryConfig,
    /// Request pacing between case downloads
    pub pacing: PacingConfig,
    /// RECAP fetch-then-poll settings
    pub recap: RecapConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// CourtListener API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API base URL
    pub base_url: String,
    /// API authentication token; empty means unauthenticated
    pub token: String,
    /// Results requested per search page
    pub page_size: usize,
    /// GET request timeout in seconds
    pub timeout_seconds: u64,
}

/// Retry and back-off policy for the transport layer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum retries per request for 429 and 5xx responses
    pub max_retries: u32,
    /// Wait applied on 429 when the server sends no Retry-After header
    pub rate_limit_fallback_secs: u64,
    /// Initial back-off for 5xx retries; doubles on each attempt
    pub backoff_base_ms: u64,
}

/// Request pacing between case downloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    /// Delay inserted between consecutive case downloads
    pub inter_case_delay_ms: u64,
}

/// RECAP fetch-then-poll settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecapConfig {
    /// Interval between readiness polls
    pub poll_interval_secs: u64,
    /// Overall deadline for the readiness poll
    pub poll_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.courtlistener.com/api/rest/v4".to_string(),
            token: String::new(),
            page_size: 100,
            timeout_seconds: 30,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            rate_limit_fallback_secs: 60,
            backoff_base_ms: 500,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            inter_case_delay_ms: 100,
        }
    }
}

impl Default for RecapConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            poll_timeout_secs: 120,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        Self::from_file("caselaw-fetch.toml")
    }

    /// Load configuration from a specific file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| FetchError::Config {
                message: format!("failed to read config file {:?}: {}", path, e),
            })?;
            toml::from_str(&content).map_err(|e| FetchError::Config {
                message: format!("failed to parse config file {:?}: {}", path, e),
            })?
        } else {
            tracing::debug!("configuration file not found: {:?}, using defaults", path);
            Config::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(token) = std::env::var("COURTLISTENER_TOKEN") {
            self.api.token = token;
        }
        if let Ok(base_url) = std::env::var("CASELAW_FETCH_BASE_URL") {
            self.api.base_url = base_url;
        }
        if let Ok(level) = std::env::var("CASELAW_FETCH_LOG") {
            self.logging.level = level;
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if !self.api.base_url.starts_with("http") {
            return Err(FetchError::Config {
                message: format!("api.base_url must be an HTTP(S) URL: {}", self.api.base_url),
            });
        }
        if self.api.page_size == 0 {
            return Err(FetchError::Config {
                message: "api.page_size must be greater than zero".to_string(),
            });
        }
        if self.api.timeout_seconds == 0 {
            return Err(FetchError::Config {
                message: "api.timeout_seconds must be greater than zero".to_string(),
            });
        }
        if self.recap.poll_interval_secs == 0
            || self.recap.poll_interval_secs > self.recap.poll_timeout_secs
        {
            return Err(FetchError::Config {
                message: "recap.poll_interval_secs must be nonzero and within the poll deadline"
                    .to_string(),
            });
        }
        Ok(())
    }

    /// GET request timeout as a duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_seconds)
    }

    /// Delay between consecutive case downloads
    pub fn inter_case_delay(&self) -> Duration {
        Duration::from_millis(self.pacing.inter_case_delay_ms)
    }
}
