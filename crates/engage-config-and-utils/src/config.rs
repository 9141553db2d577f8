//! Configuration management.

use crate::{CoreError, CoreResult, ExperimentalFeatures, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Default endpoint base (can be overridden at compile time via ENGAGE_ENDPOINT_BASE env var).
pub const DEFAULT_ENDPOINT_BASE: &str = match option_env!("ENGAGE_ENDPOINT_BASE") {
    Some(url) => url,
    None => "https://push.eservice.emarsys.net/api/mobileengage/v2/",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Retry horizon for requests that keep failing on connectivity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// First backoff delay in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound on the backoff delay in milliseconds.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Consecutive retriable failures before a request is given up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Age after which a retried request is given up, if set.
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

fn default_backoff_base_ms() -> u64 {
    2_000
}

fn default_backoff_max_ms() -> u64 {
    300_000
}

fn default_max_attempts() -> u32 {
    20
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            max_attempts: default_max_attempts(),
            max_age_secs: None,
        }
    }
}

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Application code issued by the backend.
    #[serde(default)]
    pub application_code: String,
    /// Application password; prefer ENGAGE_APPLICATION_PASSWORD over the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_password: Option<String>,
    /// Base URL all endpoints are resolved against.
    #[serde(default = "default_endpoint_base")]
    pub endpoint_base: String,
    /// Stable identifier of this installation.
    #[serde(default)]
    pub hardware_id: Option<String>,
    /// Enabled experimental features.
    #[serde(default)]
    pub experimental_features: ExperimentalFeatures,
    /// Retry horizon for connectivity failures.
    #[serde(default)]
    pub retry: RetrySettings,
    /// HTTP request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_endpoint_base() -> String {
    DEFAULT_ENDPOINT_BASE.to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            application_code: String::new(),
            application_password: None,
            endpoint_base: default_endpoint_base(),
            hardware_id: None,
            experimental_features: ExperimentalFeatures::default(),
            retry: RetrySettings::default(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Config {
    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override values from the environment.
    ///
    /// `ENGAGE_LOG_LEVEL` and `ENGAGE_APPLICATION_PASSWORD` are honored;
    /// empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(log_level) = non_empty("ENGAGE_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(password) = non_empty("ENGAGE_APPLICATION_PASSWORD") {
            self.application_password = Some(password);
        }
    }

    /// Get the endpoint base as a parsed URL.
    pub fn endpoint_base(&self) -> CoreResult<Url> {
        Url::parse(&self.endpoint_base).map_err(CoreError::from)
    }

    /// Check the values needed to talk to the backend.
    pub fn validate(&self) -> CoreResult<()> {
        if self.application_code.trim().is_empty() {
            return Err(CoreError::Config("application_code must not be empty".to_string()));
        }
        self.endpoint_base()?;
        if self.retry.max_attempts == 0 {
            return Err(CoreError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.retry.backoff_base_ms > self.retry.backoff_max_ms {
            return Err(CoreError::Config(
                "retry.backoff_base_ms must not exceed retry.backoff_max_ms".to_string(),
            ));
        }
        Ok(())
    }
}
