//! Forward-only cursor over one run's event history.

use std::collections::VecDeque;

use crate::error::{ResetError, Result};
use crate::service::{has_more, HistoryPageRequest, WorkflowService, DEFAULT_PAGE_SIZE};
use crate::types::HistoryEventView;

/// Streams the events of one run, fetching pages on demand.
///
/// The cursor never retries; a failed page fetch ends the scan with
/// [`ResetError::HistoryFetch`] and the caller decides what to do.
pub struct HistoryCursor<'a, S: WorkflowService + ?Sized> {
    service: &'a S,
    namespace: String,
    workflow_id: String,
    run_id: String,
    page_size: usize,
    buffered: VecDeque<HistoryEventView>,
    next_page_token: Option<Vec<u8>>,
    exhausted: bool,
}

impl<'a, S: WorkflowService + ?Sized> HistoryCursor<'a, S> {
    /// Creates a cursor positioned before the first event of `run_id`.
    pub fn new(
        service: &'a S,
        namespace: impl Into<String>,
        workflow_id: impl Into<String>,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            service,
            namespace: namespace.into(),
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
            page_size: DEFAULT_PAGE_SIZE,
            buffered: VecDeque::new(),
            next_page_token: None,
            exhausted: false,
        }
    }

    /// Sets the page size requested from the service.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Returns the next event, or `None` once the history is exhausted.
    pub async fn next_event(&mut self) -> Result<Option<HistoryEventView>> {
        loop {
            if let Some(event) = self.buffered.pop_front() {
                return Ok(Some(event));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fetch_page().await?;
        }
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let request = HistoryPageRequest {
            namespace: self.namespace.clone(),
            workflow_id: self.workflow_id.clone(),
            run_id: self.run_id.clone(),
            page_size: self.page_size,
            next_page_token: self.next_page_token.clone(),
        };
        let page = self
            .service
            .get_history_page(request)
            .await
            .map_err(|source| ResetError::HistoryFetch {
                workflow_id: self.workflow_id.clone(),
                run_id: self.run_id.clone(),
                source,
            })?;

        tracing::trace!(
            workflow_id = %self.workflow_id,
            run_id = %self.run_id,
            events = page.events.len(),
            "Fetched history page"
        );

        // The token advances only once a page has been received.
        self.buffered.extend(page.events);
        if has_more(&page.next_page_token) {
            self.next_page_token = page.next_page_token;
        } else {
            self.exhausted = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use crate::memory::{InMemoryService, RpcMethod, RunFixture};
    use crate::types::{EventType, HistoryEventView};

    fn service(events: i64, page_size: usize) -> InMemoryService {
        let history = (1..=events)
            .map(|id| HistoryEventView::new(id, EventType::Other))
            .collect();
        InMemoryService::new()
            .with_run(RunFixture::new("wf", "r1").with_history(history))
            .with_page_size(page_size)
    }

    async fn drain(cursor: &mut HistoryCursor<'_, InMemoryService>) -> Vec<i64> {
        let mut ids = Vec::new();
        while let Some(event) = cursor.next_event().await.unwrap() {
            ids.push(event.event_id);
        }
        ids
    }

    #[tokio::test]
    async fn test_cursor_follows_continuation_tokens() {
        let service = service(7, 3);
        let mut cursor = HistoryCursor::new(&service, "default", "wf", "r1");

        assert_eq!(drain(&mut cursor).await, vec![1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(service.call_count(RpcMethod::GetHistory), 3);
        // Exhausted cursors stay exhausted without further calls.
        assert!(cursor.next_event().await.unwrap().is_none());
        assert_eq!(service.call_count(RpcMethod::GetHistory), 3);
    }

    #[tokio::test]
    async fn test_empty_history() {
        let service = service(0, 10);
        let mut cursor = HistoryCursor::new(&service, "default", "wf", "r1");
        assert!(cursor.next_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_page_failure_surfaces_history_fetch_error() {
        let service = service(4, 2);
        let mut cursor = HistoryCursor::new(&service, "default", "wf", "r1");
        assert_eq!(cursor.next_event().await.unwrap().unwrap().event_id, 1);
        assert_eq!(cursor.next_event().await.unwrap().unwrap().event_id, 2);

        service.fail_next(RpcMethod::GetHistory, "wf", ServiceError::unavailable("reset by peer"));
        let err = cursor.next_event().await.unwrap_err();
        assert!(matches!(err, ResetError::HistoryFetch { ref run_id, .. } if run_id == "r1"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_cursor_resumes_after_failed_page() {
        let service = service(4, 2);
        let mut cursor = HistoryCursor::new(&service, "default", "wf", "r1");
        assert_eq!(cursor.next_event().await.unwrap().unwrap().event_id, 1);
        assert_eq!(cursor.next_event().await.unwrap().unwrap().event_id, 2);

        service.fail_next(RpcMethod::GetHistory, "wf", ServiceError::unavailable("reset by peer"));
        assert!(cursor.next_event().await.is_err());

        // The next call picks up from the failed page, not from the start.
        assert_eq!(drain(&mut cursor).await, vec![3, 4]);
        assert_eq!(service.call_count(RpcMethod::GetHistory), 3);
    }
}
