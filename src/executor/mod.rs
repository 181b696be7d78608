//! Job execution boundary
//!
//! The scheduler never talks to the network directly; it hands an
//! `ExecutionRequest` to an `Executor` and interprets the outcome. Tests
//! plug in scripted executors, production wires up `HttpExecutor`.

use async_trait::async_trait;
use std::time::Duration;

use crate::models::CrawlStrategy;

pub mod http;

pub use http::HttpExecutor;

/// Everything an executor needs to perform one job attempt.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub job_id: String,
    pub url: String,
    pub crawl_strategy: CrawlStrategy,
    pub max_depth: u32,
    pub timeout: Duration,
}

/// Result of one execution attempt, classified for the retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    Success,
    /// Transient condition (timeout, connection trouble, upstream 5xx).
    /// The job goes back on the queue with backoff.
    RecoverableError(String),
    /// The target will not start working by itself (gone pages, bad
    /// requests). The job fails immediately without burning retries.
    FatalError(String),
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionOutcome;
}
