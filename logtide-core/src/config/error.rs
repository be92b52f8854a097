//! Error types for configuration loading

use thiserror::Error;

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("failed to read config: {0}")]
    Io(String),

    /// Failed to parse the configuration file
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// Configuration parsed but holds an unusable value
    #[error("invalid config: {0}")]
    Invalid(String),
}
