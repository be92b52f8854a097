/*
    errors.rs - Error taxonomy for the configuration store stack

    Covers the versioned store, the typed store and the configuration
    manager. Transient backend errors are retried inside the typed store
    and never leak to external callers; version mismatches drive the
    optimistic retry loop and surface only as UpdateConflict once the
    retry budget is exhausted.
*/

use crate::store::version::ConfigVersion;
use thiserror::Error;

/// Errors that can occur in the configuration store stack
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transient backend failure (network, timeout); safe to retry
    #[error("transient backend error: {0}")]
    Transient(String),

    /// Conditional write lost the race; carries the version the store holds
    #[error("version mismatch: store is at {actual}")]
    VersionMismatch { actual: ConfigVersion },

    /// Create-only write found the key already present
    #[error("key already exists: {0}")]
    AlreadyExists(String),

    /// Key has never been written
    #[error("key not found: {0}")]
    NotFound(String),

    /// Optimistic retry budget exhausted without an accepted write
    #[error("update conflict after {attempts} attempts")]
    UpdateConflict { attempts: u32 },

    /// Transient retry budget exhausted
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Caller deadline expired before the operation completed
    #[error("operation timed out")]
    Timeout,

    /// Manager has not completed its initial load
    #[error("configuration manager is not ready")]
    NotReady,

    /// Stored blob failed checksum or format validation; fatal for the reader
    #[error("corrupt stored data: {0}")]
    Corrupt(String),

    /// Manager or engine is shutting down
    #[error("shutting down")]
    ShuttingDown,

    /// Payload (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invariant violation inside the store stack
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

impl From<bincode::Error> for StoreError {
    fn from(err: bincode::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl StoreError {
    /// Whether a caller may retry the failed operation as-is.
    ///
    /// Version mismatches are deliberately not retryable: the caller must
    /// re-read and recompute its update against the fresh value first.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}
