//! Workflow service capability.
//!
//! The engine never talks to the network directly. Every call goes through a
//! [`WorkflowService`] handle that the caller constructs and passes in, so the
//! transport can be swapped for an in-process double.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::types::{ExecutionDescription, HistoryEventView, ReapplyPolicy, WorkflowRef};

/// Default page size for history and visibility scans.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Describe execution request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescribeRequest {
    pub namespace: String,
    pub workflow_id: String,
    /// `None` describes the current run
    pub run_id: Option<String>,
}

/// History page request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPageRequest {
    pub namespace: String,
    pub workflow_id: String,
    pub run_id: String,
    pub page_size: usize,
    pub next_page_token: Option<Vec<u8>>,
}

/// History page response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
    pub events: Vec<HistoryEventView>,
    /// Empty or `None` when this is the last page
    pub next_page_token: Option<Vec<u8>>,
}

/// Visibility scan request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRequest {
    pub namespace: String,
    pub query: String,
    pub page_size: usize,
    pub next_page_token: Option<Vec<u8>>,
}

/// Visibility scan response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanPage {
    pub executions: Vec<WorkflowRef>,
    pub next_page_token: Option<Vec<u8>>,
}

/// Reset execution request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetRequest {
    pub namespace: String,
    pub workflow_id: String,
    /// Run holding the anchor event
    pub run_id: String,
    pub event_id: i64,
    pub reason: String,
    pub request_id: String,
    pub reapply_policy: ReapplyPolicy,
}

/// Reset execution response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub new_run_id: String,
}

/// Returns true if a continuation token signals another page.
pub fn has_more(token: &Option<Vec<u8>>) -> bool {
    token.as_ref().is_some_and(|t| !t.is_empty())
}

/// Workflow service trait - the RPC surface the reset engine consumes.
#[async_trait::async_trait]
pub trait WorkflowService: Send + Sync {
    async fn describe_execution(
        &self,
        request: DescribeRequest,
    ) -> Result<ExecutionDescription, ServiceError>;

    async fn get_history_page(
        &self,
        request: HistoryPageRequest,
    ) -> Result<HistoryPage, ServiceError>;

    async fn scan_executions(&self, request: ScanRequest) -> Result<ScanPage, ServiceError>;

    /// Mutating. Must never be called in dry-run mode.
    async fn reset_execution(&self, request: ResetRequest) -> Result<ResetResponse, ServiceError>;
}

#[async_trait::async_trait]
impl<T: WorkflowService + ?Sized> WorkflowService for Arc<T> {
    async fn describe_execution(
        &self,
        request: DescribeRequest,
    ) -> Result<ExecutionDescription, ServiceError> {
        (**self).describe_execution(request).await
    }

    async fn get_history_page(
        &self,
        request: HistoryPageRequest,
    ) -> Result<HistoryPage, ServiceError> {
        (**self).get_history_page(request).await
    }

    async fn scan_executions(&self, request: ScanRequest) -> Result<ScanPage, ServiceError> {
        (**self).scan_executions(request).await
    }

    async fn reset_execution(&self, request: ResetRequest) -> Result<ResetResponse, ServiceError> {
        (**self).reset_execution(request).await
    }
}
