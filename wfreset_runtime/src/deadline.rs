//! Per-call deadlines for workflow service RPCs.
//!
//! [`DeadlineService`] wraps any [`WorkflowService`] and bounds every call with
//! `tokio::time::timeout`. An elapsed deadline becomes a retryable
//! [`ServiceError`] of kind `DeadlineExceeded`.

use std::future::Future;
use std::time::Duration;

use wfreset_core::service::{
    DescribeRequest, HistoryPage, HistoryPageRequest, ResetRequest, ResetResponse, ScanPage,
    ScanRequest,
};
use wfreset_core::{ExecutionDescription, ServiceError, WorkflowService};

/// Deadline applied to each individual RPC.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeadlineConfig(Duration);

impl DeadlineConfig {
    pub fn new(duration: Duration) -> Self {
        Self(duration)
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub fn duration(&self) -> Duration {
        self.0
    }
}

impl Default for DeadlineConfig {
    /// Default deadline is 5 seconds.
    fn default() -> Self {
        Self(Duration::from_secs(5))
    }
}

/// Service decorator that enforces a [`DeadlineConfig`] on every call.
#[derive(Debug, Clone)]
pub struct DeadlineService<S> {
    inner: S,
    deadline: DeadlineConfig,
}

impl<S: WorkflowService> DeadlineService<S> {
    pub fn new(inner: S, deadline: DeadlineConfig) -> Self {
        Self { inner, deadline }
    }

    async fn bounded<T>(
        &self,
        method: &'static str,
        call: impl Future<Output = Result<T, ServiceError>>,
    ) -> Result<T, ServiceError> {
        let limit = self.deadline.duration();
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(method, "RPC exceeded deadline of {:?}", limit);
                Err(ServiceError::deadline_exceeded(format!(
                    "{method} did not complete within {limit:?}"
                )))
            }
        }
    }
}

#[async_trait::async_trait]
impl<S: WorkflowService> WorkflowService for DeadlineService<S> {
    async fn describe_execution(
        &self,
        request: DescribeRequest,
    ) -> Result<ExecutionDescription, ServiceError> {
        self.bounded("DescribeExecution", self.inner.describe_execution(request))
            .await
    }

    async fn get_history_page(
        &self,
        request: HistoryPageRequest,
    ) -> Result<HistoryPage, ServiceError> {
        self.bounded("GetHistoryPage", self.inner.get_history_page(request))
            .await
    }

    async fn scan_executions(&self, request: ScanRequest) -> Result<ScanPage, ServiceError> {
        self.bounded("ScanExecutions", self.inner.scan_executions(request))
            .await
    }

    async fn reset_execution(&self, request: ResetRequest) -> Result<ResetResponse, ServiceError> {
        self.bounded("ResetExecution", self.inner.reset_execution(request))
            .await
    }
}
