//! Executor and driver error types.

use healgrid_core::ConfigError;
use thiserror::Error;

/// Failure reported by an infrastructure driver.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DriverError {
    #[error("{target} unavailable: {reason}")]
    Unavailable { target: String, reason: String },

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("driver call timed out: {0}")]
    Timeout(String),
}

/// Errors that can occur while executing a mitigation.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("could not determine instance count for {0}")]
    InstanceCountUnavailable(String),

    #[error("timeout waiting for {endpoint} to report {target} healthy instances")]
    ScaleTimeout { endpoint: String, target: u32 },

    #[error("action {0} already in progress")]
    AlreadyInProgress(String),

    #[error("executor failure: {0}")]
    Executor(#[from] DriverError),
}

pub type ExecResult<T> = Result<T, ActionError>;
