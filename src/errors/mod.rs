//! Error types for the crawl scheduler

pub mod types;

pub use types::{ExecutorError, RepositoryError, SchedulerError};
