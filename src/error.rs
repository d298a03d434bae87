//! Error types for ingest-dl
//!
//! Failures are split into the same families the pipeline reasons about:
//! - input errors (link files, task identifiers, configuration) abort a run before scheduling
//! - capability errors (download, extract, relocate) are captured on the owning task
//! - store errors surface lookups on ids that do not exist

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ingest-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for ingest-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "concurrency")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Host download error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Extraction, relocation or cleanup error
    #[error("post-processing error: {0}")]
    PostProcess(#[from] PostProcessError),

    /// Rejected input (malformed task id, unreadable link file, bad URL)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Task not found in the state store
    #[error("task not found: {0}")]
    NotFound(String),

    /// Shutdown requested - no further phases are started
    #[error("shutdown in progress: not starting new work")]
    ShuttingDown,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// External tool execution failed (downloader scripts, unrar, etc.)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported (missing binary, unknown host, etc.)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),

    /// Constraint violation (e.g., duplicate key)
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),
}

/// Errors raised by host download capabilities
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Authentication rejected (401/403)
    #[error("access denied: {0}")]
    Auth(String),

    /// The remote file does not exist (404)
    #[error("file not found on host: {0}")]
    NotFound(String),

    /// The host asked us to slow down (429)
    #[error("rate limited (retry after {retry_after:?}s)")]
    RateLimited {
        /// Seconds the host asked us to wait, from `Retry-After`
        retry_after: Option<u64>,
    },

    /// Unexpected HTTP status
    #[error("HTTP {status}: {message}")]
    Http {
        /// Status code returned by the host
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// Downloaded size does not match the advertised size
    #[error("size mismatch: expected {expected} bytes, got {actual} bytes")]
    SizeMismatch {
        /// Size reported by the host
        expected: u64,
        /// Size found on disk
        actual: u64,
    },

    /// External downloader exceeded its time budget
    #[error("download timed out after {seconds} seconds")]
    Timeout {
        /// The configured timeout
        seconds: u64,
    },

    /// External downloader exited unsuccessfully
    #[error("downloader exited with {code:?}{tail}")]
    ScriptFailed {
        /// Exit code, absent when killed by a signal
        code: Option<i32>,
        /// Last lines of combined output, prefixed with a newline when present
        tail: String,
    },

    /// The capability reported success but produced nothing
    #[error("no files downloaded")]
    NoFiles,
}

/// Extraction, relocation and cleanup errors
#[derive(Debug, Error)]
pub enum PostProcessError {
    /// Archive extraction failed
    #[error("extraction failed for {archive}: {reason}")]
    ExtractionFailed {
        /// The archive file that failed to extract
        archive: PathBuf,
        /// The reason extraction failed
        reason: String,
    },

    /// File move/copy failed
    #[error("failed to move {source_path} to {dest_path}: {reason}")]
    MoveFailed {
        /// The source path of the file being moved
        source_path: PathBuf,
        /// The destination path where the file should be moved
        dest_path: PathBuf,
        /// The reason the move failed
        reason: String,
    },

    /// Cleanup failed (non-fatal, logged as warning)
    #[error("cleanup failed for task {id}: {reason}")]
    CleanupFailed {
        /// The task whose scratch directories could not be removed
        id: String,
        /// The reason cleanup failed
        reason: String,
    },

    /// Invalid path encountered during post-processing
    #[error("invalid path {path}: {reason}")]
    InvalidPath {
        /// The invalid path that was encountered
        path: PathBuf,
        /// The reason the path is invalid
        reason: String,
    },
}

impl Error {
    /// Shorthand for a configuration error tied to a key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }

    /// True for the store's "unknown id" failures
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_) | Error::Database(DatabaseError::NotFound(_))
        )
    }
}
