//! Reset point resolution.
//!
//! Each strategy is a single forward scan (or a constant number of them) over
//! a run's history. The scans are written as small state machines fed one
//! event at a time so the selection rules can be exercised without a service.

use crate::error::{ResetError, Result};
use crate::history::HistoryCursor;
use crate::service::{DescribeRequest, WorkflowService};
use crate::types::{
    AutoResetPoint, EventType, HistoryEventView, ResetAnchor, ResetStrategy, WorkflowRef,
};

/// Tracks the last completed workflow task, or the event after the last
/// scheduled one, whichever comes later in the history.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LastTaskScan {
    candidate: i64,
}

impl LastTaskScan {
    pub fn observe(&mut self, event: &HistoryEventView) {
        match event.event_type {
            EventType::WorkflowTaskCompleted => self.candidate = event.event_id,
            EventType::WorkflowTaskScheduled => self.candidate = event.event_id + 1,
            _ => {}
        }
    }

    /// Event id found so far; `None` if no task was seen.
    pub fn event_id(&self) -> Option<i64> {
        (self.candidate > 0).then_some(self.candidate)
    }
}

/// Finds the first completed workflow task, falling back to the event after the
/// first scheduled task when no task ever completed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FirstTaskScan {
    completed: Option<i64>,
    fallback: Option<i64>,
}

impl FirstTaskScan {
    /// Feeds one event. Returns true once the answer is final and scanning can stop.
    pub fn observe(&mut self, event: &HistoryEventView) -> bool {
        if self.completed.is_some() {
            return true;
        }
        match event.event_type {
            EventType::WorkflowTaskCompleted => {
                self.completed = Some(event.event_id);
                true
            }
            EventType::WorkflowTaskScheduled => {
                self.fallback.get_or_insert(event.event_id + 1);
                false
            }
            _ => false,
        }
    }

    pub fn event_id(&self) -> Option<i64> {
        self.completed.or(self.fallback)
    }
}

/// Picks the most recent auto-reset point not produced by the bad binary.
pub fn select_reset_point<'p>(
    points: &'p [AutoResetPoint],
    bad_checksum: &str,
) -> Option<&'p AutoResetPoint> {
    points
        .iter()
        .find(|p| p.checksum != bad_checksum && p.resettable && p.completed_task_id > 0)
}

/// Computes reset anchors against a [`WorkflowService`].
pub struct ResetPointResolver<'a, S: WorkflowService + ?Sized> {
    service: &'a S,
    namespace: String,
}

impl<'a, S: WorkflowService + ?Sized> ResetPointResolver<'a, S> {
    pub fn new(service: &'a S, namespace: impl Into<String>) -> Self {
        Self {
            service,
            namespace: namespace.into(),
        }
    }

    /// Resolves an anchor for a reference that may omit its run id.
    ///
    /// A missing run id is replaced by the workflow's current run.
    pub async fn resolve_ref(
        &self,
        target: &WorkflowRef,
        strategy: &ResetStrategy,
    ) -> Result<ResetAnchor> {
        let run_id = match &target.run_id {
            Some(run_id) => run_id.clone(),
            None => {
                self.service
                    .describe_execution(DescribeRequest {
                        namespace: self.namespace.clone(),
                        workflow_id: target.workflow_id.clone(),
                        run_id: None,
                    })
                    .await?
                    .current_run_id
            }
        };
        self.resolve(&target.workflow_id, &run_id, strategy).await
    }

    /// Resolves an anchor for a concrete run.
    pub async fn resolve(
        &self,
        workflow_id: &str,
        run_id: &str,
        strategy: &ResetStrategy,
    ) -> Result<ResetAnchor> {
        let anchor = match strategy {
            ResetStrategy::LastWorkflowTask => self.last_workflow_task(workflow_id, run_id).await?,
            ResetStrategy::FirstWorkflowTask => {
                self.first_workflow_task(workflow_id, run_id).await?
            }
            ResetStrategy::LastContinuedAsNew => {
                self.last_continued_as_new(workflow_id, run_id).await?
            }
            ResetStrategy::BadBinary { checksum } => {
                self.bad_binary(workflow_id, run_id, checksum).await?
            }
        };
        tracing::debug!(
            workflow_id,
            run_id,
            strategy = %strategy,
            anchor = %anchor,
            "Resolved reset anchor"
        );
        Ok(anchor)
    }

    fn cursor(&self, workflow_id: &str, run_id: &str) -> HistoryCursor<'a, S> {
        HistoryCursor::new(self.service, self.namespace.clone(), workflow_id, run_id)
    }

    async fn last_workflow_task(&self, workflow_id: &str, run_id: &str) -> Result<ResetAnchor> {
        let mut cursor = self.cursor(workflow_id, run_id);
        let mut scan = LastTaskScan::default();
        while let Some(event) = cursor.next_event().await? {
            scan.observe(&event);
        }
        let event_id = scan.event_id().ok_or_else(|| ResetError::NoTaskFound {
            workflow_id: workflow_id.to_string(),
            run_id: run_id.to_string(),
        })?;
        ResetAnchor::new(run_id, event_id)
    }

    async fn first_workflow_task(&self, workflow_id: &str, run_id: &str) -> Result<ResetAnchor> {
        let mut cursor = self.cursor(workflow_id, run_id);
        let mut scan = FirstTaskScan::default();
        while let Some(event) = cursor.next_event().await? {
            if scan.observe(&event) {
                break;
            }
        }
        let event_id = scan.event_id().ok_or_else(|| ResetError::NoTaskFound {
            workflow_id: workflow_id.to_string(),
            run_id: run_id.to_string(),
        })?;
        ResetAnchor::new(run_id, event_id)
    }

    /// Resets into the run this run continued from, exactly one generation back.
    async fn last_continued_as_new(&self, workflow_id: &str, run_id: &str) -> Result<ResetAnchor> {
        let mut head = self.cursor(workflow_id, run_id).with_page_size(1);
        let previous_run = head
            .next_event()
            .await?
            .and_then(|first| first.continued_from_run_id)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| ResetError::NotContinued {
                workflow_id: workflow_id.to_string(),
                run_id: run_id.to_string(),
            })?;

        self.last_workflow_task(workflow_id, &previous_run).await
    }

    async fn bad_binary(
        &self,
        workflow_id: &str,
        run_id: &str,
        bad_checksum: &str,
    ) -> Result<ResetAnchor> {
        let description = self
            .service
            .describe_execution(DescribeRequest {
                namespace: self.namespace.clone(),
                workflow_id: workflow_id.to_string(),
                run_id: Some(run_id.to_string()),
            })
            .await?;

        let point = select_reset_point(&description.auto_reset_points, bad_checksum).ok_or_else(
            || ResetError::NoResetPoint {
                workflow_id: workflow_id.to_string(),
                run_id: run_id.to_string(),
            },
        )?;
        ResetAnchor::new(run_id, point.completed_task_id)
    }
}
