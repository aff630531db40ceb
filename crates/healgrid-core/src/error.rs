//! Configuration error types.

use thiserror::Error;

/// Result type alias for configuration and parameter handling.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading configuration or interpreting policy
/// and action parameters.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown metric: {0}")]
    UnknownMetric(String),

    #[error("unknown operator: {0}")]
    UnknownOperator(String),

    #[error("unsupported load balancing algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("invalid parameter `{key}`: {reason}")]
    InvalidParameter { key: String, reason: String },

    #[error("policy {0} defines no actions")]
    MissingAction(String),

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
