//! Error types for script-bundler
//!
//! This module provides the error taxonomy for the library:
//! - Protocol errors from the script hub (non-zero status, transport failure,
//!   malformed responses), fatal to the enclosing call
//! - Task queue errors (unknown id, failed job, duplicate id)
//! - Database errors from the queue's SQLite persistence
//!
//! Not-found lookups and per-row manifest failures are deliberately *not*
//! errors; they surface as `Option`/summary counts at the call sites.

use thiserror::Error;

/// Result type alias for script-bundler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for script-bundler
#[derive(Debug, Error)]
pub enum Error {
    /// The hub answered with a non-zero status attribute
    #[error("hub returned status {status}")]
    Protocol {
        /// The non-zero status code from the response root element
        status: i32,
    },

    /// The hub response could not be parsed as XML
    #[error("malformed hub response: {0}")]
    MalformedResponse(String),

    /// Transport-level failure talking to the hub
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The configured hub URL is not a valid URL
    #[error("invalid hub URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Zip archive writer error
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No task with that id exists in the queue
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// The task's worker returned an error; the job is terminally failed
    #[error("task {task_id} failed: {reason}")]
    TaskFailed {
        /// The id of the failed task
        task_id: String,
        /// The worker's error, as recorded at failure time
        reason: String,
    },

    /// The task has not finished yet, so it has no return value
    #[error("task not finished: {0}")]
    TaskNotFinished(String),

    /// A task with that id was already enqueued
    #[error("duplicate task id: {0}")]
    DuplicateTask(String),

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
}
