//! HTTP-backed executor

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{ExecutionOutcome, ExecutionRequest, Executor};
use crate::config::ExecutorConfig;
use crate::errors::{ExecutorError, SchedulerError};

/// Fetches the job's target over HTTP and classifies the response.
///
/// The crawl strategy and depth ride along to the downstream extraction
/// pipeline; at this layer every strategy starts with the same fetch of the
/// entry URL.
pub struct HttpExecutor {
    client: reqwest::Client,
}

impl HttpExecutor {
    pub fn new(config: &ExecutorConfig) -> Result<Self, SchedulerError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| SchedulerError::configuration(format!("http client: {e}")))?;

        Ok(Self { client })
    }

    fn status_error(status: StatusCode, url: &str) -> Option<ExecutorError> {
        if status.is_success() {
            None
        } else {
            Some(ExecutorError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            })
        }
    }

    async fn fetch(&self, request: &ExecutionRequest) -> Option<ExecutorError> {
        let response = self
            .client
            .get(&request.url)
            .timeout(request.timeout)
            .send()
            .await;

        match response {
            Ok(response) => Self::status_error(response.status(), &request.url),
            Err(e) if e.is_timeout() => Some(ExecutorError::Timeout {
                url: request.url.clone(),
                timeout_secs: request.timeout.as_secs(),
            }),
            Err(e) if e.is_builder() || e.is_request() => Some(ExecutorError::InvalidRequest {
                url: request.url.clone(),
                message: e.to_string(),
            }),
            Err(e) => Some(ExecutorError::Connection {
                url: request.url.clone(),
                message: e.to_string(),
            }),
        }
    }
}

#[async_trait]
impl Executor for HttpExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionOutcome {
        tracing::debug!(
            job_id = %request.job_id,
            url = %request.url,
            strategy = request.crawl_strategy.as_str(),
            "Executing crawl job"
        );

        match self.fetch(request).await {
            None => ExecutionOutcome::Success,
            Some(error) if error.is_recoverable() => {
                ExecutionOutcome::RecoverableError(error.to_string())
            }
            Some(error) => ExecutionOutcome::FatalError(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome_for(status: StatusCode) -> ExecutionOutcome {
        match HttpExecutor::status_error(status, "https://example.org/x") {
            None => ExecutionOutcome::Success,
            Some(error) if error.is_recoverable() => {
                ExecutionOutcome::RecoverableError(error.to_string())
            }
            Some(error) => ExecutionOutcome::FatalError(error.to_string()),
        }
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(outcome_for(StatusCode::OK), ExecutionOutcome::Success);
        assert!(matches!(
            outcome_for(StatusCode::NOT_FOUND),
            ExecutionOutcome::FatalError(_)
        ));
        assert!(matches!(
            outcome_for(StatusCode::GONE),
            ExecutionOutcome::FatalError(_)
        ));
        assert!(matches!(
            outcome_for(StatusCode::FORBIDDEN),
            ExecutionOutcome::FatalError(_)
        ));
        assert!(matches!(
            outcome_for(StatusCode::BAD_GATEWAY),
            ExecutionOutcome::RecoverableError(_)
        ));
        assert!(matches!(
            outcome_for(StatusCode::SERVICE_UNAVAILABLE),
            ExecutionOutcome::RecoverableError(_)
        ));
    }

    #[test]
    fn test_error_messages_carry_the_target_url() {
        let error = HttpExecutor::status_error(StatusCode::NOT_FOUND, "https://example.org/x")
            .expect("non-success status maps to an error");
        assert!(error.to_string().contains("https://example.org/x"));
        assert!(error.to_string().contains("404"));
    }
}
