//! Error types for the content cache
//!
//! Provides unified error handling using thiserror. Absence of a record is
//! never an error: reads return `None` instead.

use thiserror::Error;

// == Content Cache Error Enum ==
/// Unified error type for the store and the cache front.
#[derive(Error, Debug)]
pub enum ContentCacheError {
    /// The persistent table did not become ready within the bounded wait
    #[error("Table '{table}' not ready after {waited_ms}ms")]
    StartupTimeout { table: String, waited_ms: u64 },

    /// The persistent table could not be opened or replayed
    #[error("Store startup failed: {0}")]
    StartupFailed(String),

    /// A set/rm transaction did not complete atomically
    #[error("Transaction aborted: {0}")]
    Transaction(String),

    /// The bound fetcher (or the upstream behind it) failed
    #[error("Fetcher failed: {0}")]
    Fetcher(#[from] anyhow::Error),

    /// The cache unit is no longer running
    #[error("Cache unit is no longer running")]
    CacheClosed,
}

// == Result Type Alias ==
/// Convenience Result type for the content cache.
pub type Result<T> = std::result::Result<T, ContentCacheError>;
