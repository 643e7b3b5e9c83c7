//! Unified error types for pagelift.
//!
//! The cache core fails fast: `CacheEntry` and the diff engine return the
//! precise kind and never retry. Retry and backoff policy for collaborator
//! failures belongs to the revalidation layer's callers.

use tokio_rusqlite::rusqlite;

/// Unified error types for the pagelift cache.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No cache entry exists for the given session id.
    #[error("NOT_FOUND: {0}")]
    NotFound(String),

    /// A commit attempt was older than the entry's committed state.
    #[error("STALE_UPDATE: {0}")]
    StaleUpdate(String),

    /// Internal bug in the commit path, e.g. an update addressed to a
    /// different session than the entry it was applied to. Never swallowed.
    #[error("INVARIANT_VIOLATION: {0}")]
    InvariantViolation(String),

    /// Invalid input parameters (e.g., empty payload, duplicate marker).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Fetcher failed to retrieve the resource.
    #[error("FETCH_FAILED: {0}")]
    FetchFailed(String),

    /// Fetcher timed out.
    #[error("FETCH_TIMEOUT: {0}")]
    FetchTimeout(String),

    /// Response exceeded the configured size limit.
    #[error("FETCH_TOO_LARGE: {0}")]
    FetchTooLarge(String),

    /// Splitter could not derive template and dynamic data from a payload.
    #[error("SPLIT_FAILED: {0}")]
    SplitFailed(String),

    /// Database operation failed.
    #[error("PERSIST_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("PERSIST_ERROR: migration failed: {0}")]
    MigrationFailed(String),
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}
