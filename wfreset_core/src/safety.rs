//! Pre-flight checks that may skip a target before any mutation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::history::HistoryCursor;
use crate::service::{DescribeRequest, WorkflowService};
use crate::types::{EventType, HistoryEventView, TaskFailedCause, WorkflowRef};

/// Why a target was skipped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// The given run is not the workflow's current run.
    BaseNotCurrent { current_run_id: String },
    /// The current run is still open.
    CurrentRunOpen { current_run_id: String },
    /// The run does not end in a non-deterministic workflow task failure.
    NotNonDeterministic,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::BaseNotCurrent { current_run_id } => {
                write!(f, "base run is different from current run {current_run_id}")
            }
            SkipReason::CurrentRunOpen { current_run_id } => {
                write!(f, "current run {current_run_id} is open")
            }
            SkipReason::NotNonDeterministic => {
                f.write_str("last workflow task did not fail with a nondeterministic error")
            }
        }
    }
}

/// Result of the safety checks for one target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Proceed against `run_id` (the given run, or the current run if none was given).
    Proceed { run_id: String },
    Skip(SkipReason),
}

/// Tracks the most recent workflow task failure not followed by a completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NonDeterminismScan {
    pending_failure: Option<HistoryEventView>,
}

impl NonDeterminismScan {
    pub fn observe(&mut self, event: &HistoryEventView) {
        match event.event_type {
            EventType::WorkflowTaskFailed => self.pending_failure = Some(event.clone()),
            EventType::WorkflowTaskCompleted => self.pending_failure = None,
            _ => {}
        }
    }

    /// True if the pending failure looks like a non-determinism failure.
    pub fn is_non_deterministic(&self) -> bool {
        self.pending_failure.as_ref().is_some_and(|failed| {
            failed.failure_cause == Some(TaskFailedCause::WorkerUnhandledFailure)
                || failed
                    .failure_message
                    .as_deref()
                    .is_some_and(|m| m.contains("nondeterministic"))
        })
    }
}

/// Independent, individually enabled skip conditions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyFilter {
    pub skip_if_open: bool,
    pub skip_if_base_not_current: bool,
    pub non_deterministic_only: bool,
}

impl SafetyFilter {
    /// Runs the enabled checks for `target`.
    ///
    /// Issues one describe call for the current run, plus a full history scan
    /// when `non_deterministic_only` is set.
    pub async fn check<S: WorkflowService + ?Sized>(
        &self,
        service: &S,
        namespace: &str,
        target: &WorkflowRef,
    ) -> Result<Verdict> {
        let description = service
            .describe_execution(DescribeRequest {
                namespace: namespace.to_string(),
                workflow_id: target.workflow_id.clone(),
                run_id: None,
            })
            .await?;
        let current_run_id = description.current_run_id;

        // Compared before the run id defaults to the current run, so a target
        // without a run id is skipped too.
        if self.skip_if_base_not_current && target.run_id_or_empty() != current_run_id {
            return Ok(Verdict::Skip(SkipReason::BaseNotCurrent { current_run_id }));
        }

        if self.skip_if_open && description.is_open {
            return Ok(Verdict::Skip(SkipReason::CurrentRunOpen { current_run_id }));
        }

        let run_id = target.run_id.clone().unwrap_or(current_run_id);

        if self.non_deterministic_only {
            let mut cursor = HistoryCursor::new(service, namespace, &target.workflow_id, &run_id);
            let mut scan = NonDeterminismScan::default();
            while let Some(event) = cursor.next_event().await? {
                scan.observe(&event);
            }
            if !scan.is_non_deterministic() {
                return Ok(Verdict::Skip(SkipReason::NotNonDeterministic));
            }
            tracing::info!(
                workflow_id = %target.workflow_id,
                run_id = %run_id,
                "Found non-deterministic workflow"
            );
        }

        Ok(Verdict::Proceed { run_id })
    }
}
