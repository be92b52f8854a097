//! Configuration for the logtide membership core
//!
//! Tuning knobs for the retry loop, the configuration manager and the
//! replicated state machine engine, with defaults suitable for a small
//! cluster, TOML file loading and environment overrides.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

mod error;

pub use error::ConfigError;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    /// Retry/backoff policy for backend operations
    pub retry: RetryConfig,

    /// Configuration manager tuning
    pub manager: ManagerConfig,

    /// Replicated state machine tuning
    pub rsm: RsmConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Retry/backoff policy for the optimistic update loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts before surfacing UpdateConflict/Unavailable
    pub max_attempts: u32,

    /// Initial backoff after a transient failure
    #[serde(with = "humantime_serde")]
    pub base_backoff: Duration,

    /// Backoff ceiling
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 10,
            base_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Tight budgets so retry paths stay fast under test.
    pub fn fast_for_tests() -> Self {
        RetryConfig {
            max_attempts: 4,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }
}

/// Configuration manager tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// How long the manager may stay in Loading before proposals and
    /// readiness waits fail with NotReady
    #[serde(with = "humantime_serde")]
    pub ready_deadline: Duration,

    /// Poll interval for catching externally-originated version bumps
    /// missed by the watch channel
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Bound on each subscriber's notification queue. A subscriber that
    /// falls this far behind is disconnected rather than allowed to
    /// block delivery to others.
    pub subscriber_queue_depth: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            ready_deadline: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
            subscriber_queue_depth: 64,
        }
    }
}

/// Replicated state machine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsmConfig {
    /// Write a snapshot after this many applied deltas
    pub snapshot_every_deltas: u64,

    /// Also write a snapshot if this much time passed since the last one
    /// and at least one delta was applied
    #[serde(with = "humantime_serde")]
    pub snapshot_interval: Duration,

    /// Bound on each state subscriber's notification queue; same
    /// overflow policy as the manager's
    pub subscriber_queue_depth: usize,
}

impl Default for RsmConfig {
    fn default() -> Self {
        RsmConfig {
            snapshot_every_deltas: 1000,
            snapshot_interval: Duration::from_secs(300),
            subscriber_queue_depth: 64,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Emit JSON-formatted records
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { level: "info".to_string(), json_format: false }
    }
}

impl CoreConfig {
    /// Load configuration from a TOML file, then apply environment
    /// overrides and validate.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.as_ref().display(), e)))?;
        let mut config: CoreConfig =
            toml::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = CoreConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(level) = env::var("LOGTIDE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(attempts) = env::var("LOGTIDE_MAX_UPDATE_ATTEMPTS") {
            if let Ok(n) = attempts.parse() {
                self.retry.max_attempts = n;
            }
        }
        if let Ok(depth) = env::var("LOGTIDE_SUBSCRIBER_QUEUE_DEPTH") {
            if let Ok(n) = depth.parse() {
                self.manager.subscriber_queue_depth = n;
            }
        }
    }

    /// Reject configurations that would disable core mechanisms.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.base_backoff > self.retry.max_backoff {
            return Err(ConfigError::Invalid(
                "retry.base_backoff must not exceed retry.max_backoff".into(),
            ));
        }
        if self.manager.subscriber_queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "manager.subscriber_queue_depth must be at least 1".into(),
            ));
        }
        if self.rsm.snapshot_every_deltas == 0 {
            return Err(ConfigError::Invalid("rsm.snapshot_every_deltas must be at least 1".into()));
        }
        if self.rsm.subscriber_queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "rsm.subscriber_queue_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
