/*
    errors.rs - Error types for the replicated state machine engine

    Delta rejection is deliberately NOT an error here: a rejected delta
    is logged and skipped identically on every replica, so it can never
    desynchronize them. Errors below are the failures that stop or
    degrade a single replica.
*/

use thiserror::Error;

/// Errors that can occur in the replicated state machine engine
#[derive(Debug, Error)]
pub enum RsmError {
    /// Delta log backend failure
    #[error("delta log error: {0}")]
    Backend(String),

    /// Snapshot or delta blob failed validation; fatal for bootstrap
    #[error("corrupt replicated data: {0}")]
    Corrupt(String),

    /// Delta (de)serialization failure on the posting path
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Waited past the caller's deadline
    #[error("operation timed out")]
    Timeout,

    /// Engine is shutting down
    #[error("shutting down")]
    ShuttingDown,

    /// Invariant violation inside the engine
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for engine operations
pub type RsmResult<T> = Result<T, RsmError>;

impl From<bincode::Error> for RsmError {
    fn from(err: bincode::Error) -> Self {
        RsmError::Serialization(err.to_string())
    }
}
