//! Configuration management for hostrig
//!
//! Run-time knobs are loaded from environment variables with sensible
//! defaults and can be overridden by command-line flags. A variable that is
//! set but does not parse is an error, never a silent fallback. The deployment itself
//! is described separately by a [`DeploymentDescriptor`](crate::descriptor::DeploymentDescriptor).
//!
//! # Environment Variables
//!
//! - `HOSTRIG_HEALTH_TIMEOUT`: Seconds to wait for the service to become healthy - default: "120"
//! - `HOSTRIG_HEALTH_INTERVAL`: Seconds between health probes - default: "2"
//! - `HOSTRIG_STEP_TIMEOUT`: Seconds allowed for one step attempt - default: "300"
//! - `HOSTRIG_RETRY_ATTEMPTS`: Attempts per step before it fails - default: "3"
//! - `HOSTRIG_RETRY_BACKOFF`: Initial backoff in seconds, doubled per retry - default: "2"
//! - `HOSTRIG_MAX_PARALLEL`: Steps run concurrently when independent - default: "1"
//! - `HOSTRIG_LOCK_DIR`: Directory for cross-process lock files - default: runtime dir or temp dir + "hostrig-locks"
//! - `HOSTRIG_LOG_LEVEL`: Logging level - default: "info"
//!
//! # Example
//!
//! ```no_run
//! use hostrig::HostrigConfig;
//!
//! let config = HostrigConfig::from_env().expect("Invalid environment");
//! config.validate().expect("Invalid configuration");
//! let policy = config.retry_policy();
//! ```

use crate::health::{HealthPolicy, DEFAULT_HEALTH_INTERVAL_SECS, DEFAULT_HEALTH_TIMEOUT_SECS};
use crate::steps::RetryPolicy;
use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_STEP_TIMEOUT_SECS: u64 = 300;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF_SECS: u64 = 2;
const DEFAULT_MAX_PARALLEL: usize = 1;
const LOCK_DIR_NAME: &str = "hostrig-locks";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// Failed to parse configuration value
    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostrigConfig {
    pub health_timeout_secs: u64,
    pub health_interval_secs: u64,
    pub step_timeout_secs: u64,
    pub retry_attempts: u32,
    pub retry_backoff_secs: u64,
    pub max_parallel: usize,
    /// Where advisory lock files live; `None` keeps locking in-process
    pub lock_dir: Option<PathBuf>,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Parsed value of `key`, `None` when unset or empty
fn env_parse<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => {
            v.trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::ParseError {
                    field: key.to_string(),
                    error: format!("'{}': {}", v.trim(), e),
                })
        }
        _ => Ok(None),
    }
}

fn default_lock_dir() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(env::temp_dir)
        .join(LOCK_DIR_NAME)
}

impl Default for HostrigConfig {
    fn default() -> Self {
        Self {
            health_timeout_secs: DEFAULT_HEALTH_TIMEOUT_SECS,
            health_interval_secs: DEFAULT_HEALTH_INTERVAL_SECS,
            step_timeout_secs: DEFAULT_STEP_TIMEOUT_SECS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_backoff_secs: DEFAULT_RETRY_BACKOFF_SECS,
            max_parallel: DEFAULT_MAX_PARALLEL,
            lock_dir: Some(default_lock_dir()),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl HostrigConfig {
    /// Load from `HOSTRIG_*` environment variables over the defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ParseError` naming the variable when a set value
    /// does not parse. Unset or empty variables keep their default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let lock_dir = env::var("HOSTRIG_LOCK_DIR")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or(defaults.lock_dir);

        let log_level = env::var("HOSTRIG_LOG_LEVEL")
            .map(|v| v.to_lowercase())
            .unwrap_or(defaults.log_level);

        Ok(Self {
            health_timeout_secs: env_parse("HOSTRIG_HEALTH_TIMEOUT")?
                .unwrap_or(defaults.health_timeout_secs),
            health_interval_secs: env_parse("HOSTRIG_HEALTH_INTERVAL")?
                .unwrap_or(defaults.health_interval_secs),
            step_timeout_secs: env_parse("HOSTRIG_STEP_TIMEOUT")?
                .unwrap_or(defaults.step_timeout_secs),
            retry_attempts: env_parse("HOSTRIG_RETRY_ATTEMPTS")?
                .unwrap_or(defaults.retry_attempts),
            retry_backoff_secs: env_parse("HOSTRIG_RETRY_BACKOFF")?
                .unwrap_or(defaults.retry_backoff_secs),
            max_parallel: env_parse("HOSTRIG_MAX_PARALLEL")?.unwrap_or(defaults.max_parallel),
            lock_dir,
            log_level,
        })
    }

    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any validation fails
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.health_interval_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Health interval must be at least 1 second".to_string(),
            ));
        }
        if self.health_timeout_secs < self.health_interval_secs {
            return Err(ConfigError::ValidationFailed(format!(
                "Health timeout ({}s) cannot be shorter than the interval ({}s)",
                self.health_timeout_secs, self.health_interval_secs
            )));
        }
        if self.step_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Step timeout must be at least 1 second".to_string(),
            ));
        }
        if self.retry_attempts == 0 || self.retry_attempts > 10 {
            return Err(ConfigError::ValidationFailed(format!(
                "Retry attempts must be between 1 and 10, got {}",
                self.retry_attempts
            )));
        }
        if self.max_parallel == 0 {
            return Err(ConfigError::ValidationFailed(
                "Max parallel steps must be at least 1".to_string(),
            ));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            initial_backoff: Duration::from_secs(self.retry_backoff_secs),
            step_timeout: Duration::from_secs(self.step_timeout_secs),
        }
    }

    pub fn health_policy(&self) -> HealthPolicy {
        HealthPolicy {
            timeout: Duration::from_secs(self.health_timeout_secs),
            interval: Duration::from_secs(self.health_interval_secs),
        }
    }
}

impl HostrigConfig {
    /// Flat key/value view for `hostrig config`
    pub fn to_display_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(
            "health_timeout".to_string(),
            format!("{}s", self.health_timeout_secs),
        );
        map.insert(
            "health_interval".to_string(),
            format!("{}s", self.health_interval_secs),
        );
        map.insert(
            "step_timeout".to_string(),
            format!("{}s", self.step_timeout_secs),
        );
        map.insert(
            "retry_attempts".to_string(),
            self.retry_attempts.to_string(),
        );
        map.insert(
            "retry_backoff".to_string(),
            format!("{}s", self.retry_backoff_secs),
        );
        map.insert("max_parallel".to_string(), self.max_parallel.to_string());
        map.insert(
            "lock_dir".to_string(),
            self.lock_dir
                .as_ref()
                .map(|d| d.display().to_string())
                .unwrap_or_else(|| "(in-process only)".to_string()),
        );
        map.insert("log_level".to_string(), self.log_level.clone());
        map
    }
}

impl fmt::Display for HostrigConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Hostrig Configuration:")?;
        writeln!(f, "  Health Timeout: {}s", self.health_timeout_secs)?;
        writeln!(f, "  Health Interval: {}s", self.health_interval_secs)?;
        writeln!(f, "  Step Timeout: {}s", self.step_timeout_secs)?;
        writeln!(
            f,
            "  Retries: {} (backoff {}s)",
            self.retry_attempts, self.retry_backoff_secs
        )?;
        writeln!(f, "  Max Parallel: {}", self.max_parallel)?;
        if let Some(ref dir) = self.lock_dir {
            writeln!(f, "  Lock Dir: {}", dir.display())?;
        }
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}
