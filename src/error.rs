//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Operation invoked on a closed cache
    #[error("Cache closed: {0}")]
    Closed(String),

    /// Invalid argument, e.g. a duplicate listener registration
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Store-by-value deep copy failed
    #[error("Value copy failed: {0}")]
    CopyFailed(String),

    /// Read-through loader failure
    #[error("Loader error: {0}")]
    Loader(String),

    /// Write-through writer failure
    #[error("Writer error: {0}")]
    Writer(String),

    /// Operation intentionally not supported
    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
