//! Unified error types for trendmine.
//!
//! Display strings carry a stable code prefix so callers and MCP clients can
//! match on them without parsing the message.

use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

use crate::status::FetchStatus;

/// Unified error types for the trendmine crates.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid query parameters (empty keyword list, unknown timeframe, ...).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// No cache entry found for the given fingerprint hash.
    #[error("CACHE_MISS: {0}")]
    CacheMiss(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Payload file store failed.
    #[error("CACHE_ERROR: storage: {0}")]
    Storage(String),

    /// Provider kept throttling after retries were exhausted.
    #[error("RATE_LIMITED: {0}")]
    RateLimited(String),

    /// Transport error or non-retryable HTTP status.
    #[error("NETWORK_ERROR: {0}")]
    NetworkError(String),

    /// Session handshake could not be completed.
    #[error("BOOTSTRAP_FAILED: {0}")]
    BootstrapFailed(String),

    /// Request or caller deadline expired.
    #[error("FETCH_TIMEOUT: {0}")]
    FetchTimeout(String),
}

impl Error {
    /// Result code for errors that describe a failed fetch.
    ///
    /// Returns `None` for input and cache errors, which never come out of the
    /// acquisition path.
    pub fn fetch_status(&self) -> Option<FetchStatus> {
        match self {
            Error::RateLimited(_) => Some(FetchStatus::RateLimited),
            Error::NetworkError(_) => Some(FetchStatus::NetworkError),
            Error::BootstrapFailed(_) => Some(FetchStatus::BootstrapFailed),
            Error::FetchTimeout(_) => Some(FetchStatus::Timeout),
            _ => None,
        }
    }
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

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let (code, message) = match &err {
            Error::InvalidInput(msg) => (-32602, msg.clone()),
            Error::CacheMiss(msg) => (-32001, msg.clone()),
            Error::Database(e) => (-32002, e.to_string()),
            Error::MigrationFailed(msg) => (-32002, msg.clone()),
            Error::Storage(msg) => (-32002, msg.clone()),
            Error::RateLimited(msg) => (-32010, msg.clone()),
            Error::NetworkError(msg) => (-32008, msg.clone()),
            Error::BootstrapFailed(msg) => (-32013, msg.clone()),
            Error::FetchTimeout(msg) => (-32006, msg.clone()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
