//! Error type definitions for the crawl scheduler
//!
//! This module defines all error types used throughout the application,
//! providing a hierarchical error system that makes debugging and error
//! handling more straightforward.

use thiserror::Error;

/// Top-level scheduler error type
///
/// This enum represents all possible errors that can occur in the scheduler.
/// It uses `thiserror` to provide automatic error trait implementations and
/// proper error chaining.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Repository layer errors
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Executor errors
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

/// Repository layer specific errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// Stored value that cannot be mapped back to a domain type
    #[error("Invalid stored value: {column} = {value}")]
    InvalidStoredValue { column: String, value: String },
}

/// Failures of a single execution attempt against a target URL.
///
/// The retry policy only cares whether an error is recoverable; the variants
/// keep enough detail for the job's `last_error` and the logs.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// Hard timeout budget exceeded
    #[error("Execution timed out after {timeout_secs}s: {url}")]
    Timeout { url: String, timeout_secs: u64 },

    /// HTTP errors from the target site
    #[error("HTTP error: {status} - {url}")]
    Http { status: u16, url: String },

    /// Connection-level failures
    #[error("Connection failed: {url} - {message}")]
    Connection { url: String, message: String },

    /// The request itself is malformed and will never succeed
    #[error("Invalid request: {url} - {message}")]
    InvalidRequest { url: String, message: String },
}

impl ExecutorError {
    /// True when a later attempt against the same target may succeed.
    ///
    /// Timeouts, connection trouble and upstream 5xx are transient; 4xx
    /// responses (404/410 included) and malformed requests are not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            ExecutorError::Timeout { .. } | ExecutorError::Connection { .. } => true,
            ExecutorError::Http { status, .. } => *status >= 500,
            ExecutorError::InvalidRequest { .. } => false,
        }
    }
}

impl SchedulerError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

impl RepositoryError {
    /// Create an invalid stored value error
    pub fn invalid_stored_value<C: Into<String>, V: Into<String>>(column: C, value: V) -> Self {
        Self::InvalidStoredValue {
            column: column.into(),
            value: value.into(),
        }
    }
}
