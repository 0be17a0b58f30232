//! Error types for the cache coordination engine
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
///
/// Cloneable so a single in-flight load result can be handed to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Backend unreachable or a backend call timed out
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Backend rejected the operation
    #[error("Backend error: {0}")]
    Backend(String),

    /// Key is empty, too long or uses a reserved prefix
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Invalid argument supplied by the caller
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Value exceeds the maximum entry size
    #[error("Value too large: {0} bytes")]
    ValueTooLarge(usize),

    /// Authoritative store load failed
    #[error("Loader failed: {0}")]
    LoaderFailed(String),

    /// Authoritative store persist failed
    #[error("Saver failed: {0}")]
    SaverFailed(String),

    /// Lock wait budget exhausted
    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    /// Write-behind retries exhausted
    #[error("Flush exhausted: {0}")]
    FlushExhausted(String),

    /// Entry envelope could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CacheError {
    // == Retryable ==
    /// Returns true for transient failures the caller may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CacheError::BackendUnavailable(_) | CacheError::LockTimeout(_)
        )
    }

    /// Wraps a loader failure, keeping the whole error chain.
    pub(crate) fn loader(err: anyhow::Error) -> Self {
        CacheError::LoaderFailed(format!("{:#}", err))
    }

    /// Wraps a saver failure, keeping the whole error chain.
    pub(crate) fn saver(err: anyhow::Error) -> Self {
        CacheError::SaverFailed(format!("{:#}", err))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
