//! Batch outcome report with serde-serializable entries and JSON persistence.
//!
//! Every target that leaves the source ends in exactly one [`TargetOutcome`]:
//! - `Reset`: the service accepted the reset and started a new run
//! - `DryRun`: an anchor was resolved but nothing was submitted
//! - `Skipped`: a safety check rejected the target
//! - `Excluded`: the workflow id is in the exclusion set
//! - `Failed`: the target gave up after its retry budget or a final error
//!
//! The [`BatchReport`] collects them together with the metrics summary and can
//! be written to disk as pretty-printed JSON.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use wfreset_core::{ResetAnchor, SkipReason, WorkflowRef};
use wfreset_runtime::{MetricsSummary, OutcomeKind};

/// Error types for report persistence.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("Write failed: {0}")]
    WriteFailed(#[from] std::io::Error),
}

/// Terminal state of one target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeStatus {
    Reset {
        anchor_run_id: String,
        event_id: i64,
        new_run_id: String,
    },
    DryRun {
        anchor_run_id: String,
        event_id: i64,
    },
    Skipped {
        reason: SkipReason,
    },
    Excluded,
    Failed {
        error: String,
    },
}

impl OutcomeStatus {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            OutcomeStatus::Reset { .. } => OutcomeKind::Reset,
            OutcomeStatus::DryRun { .. } => OutcomeKind::DryRun,
            OutcomeStatus::Skipped { .. } => OutcomeKind::Skipped,
            OutcomeStatus::Excluded => OutcomeKind::Excluded,
            OutcomeStatus::Failed { .. } => OutcomeKind::Failed,
        }
    }

    pub fn dry_run(anchor: &ResetAnchor) -> Self {
        OutcomeStatus::DryRun {
            anchor_run_id: anchor.anchor_run_id.clone(),
            event_id: anchor.event_id,
        }
    }

    pub fn reset(anchor: &ResetAnchor, new_run_id: impl Into<String>) -> Self {
        OutcomeStatus::Reset {
            anchor_run_id: anchor.anchor_run_id.clone(),
            event_id: anchor.event_id,
            new_run_id: new_run_id.into(),
        }
    }
}

/// Outcome of one target, as printed and persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetOutcome {
    pub workflow_id: String,
    /// Run id as given by the source; `None` means the current run
    pub run_id: Option<String>,
    #[serde(flatten)]
    pub status: OutcomeStatus,
    /// Pipeline attempts, zero for excluded targets
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl TargetOutcome {
    pub fn new(target: &WorkflowRef, status: OutcomeStatus, attempts: u32) -> Self {
        Self {
            workflow_id: target.workflow_id.clone(),
            run_id: target.run_id.clone(),
            status,
            attempts,
            timestamp: Utc::now(),
        }
    }

    pub fn excluded(target: &WorkflowRef) -> Self {
        Self::new(target, OutcomeStatus::Excluded, 0)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.status, OutcomeStatus::Failed { .. })
    }
}

impl fmt::Display for TargetOutcome {
    /// One line per target: `<workflow_id>\t<run_id>\t<status> <detail>`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\t",
            self.workflow_id,
            self.run_id.as_deref().unwrap_or("-")
        )?;
        match &self.status {
            OutcomeStatus::Reset {
                anchor_run_id,
                event_id,
                new_run_id,
            } => write!(
                f,
                "reset anchor={anchor_run_id}@{event_id} new_run_id={new_run_id}"
            ),
            OutcomeStatus::DryRun {
                anchor_run_id,
                event_id,
            } => write!(f, "dry-run anchor={anchor_run_id}@{event_id}"),
            OutcomeStatus::Skipped { reason } => write!(f, "skipped: {reason}"),
            OutcomeStatus::Excluded => f.write_str("excluded"),
            OutcomeStatus::Failed { error } => {
                write!(f, "failed after {} attempt(s): {error}", self.attempts)
            }
        }
    }
}

/// Everything a batch produced.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub dry_run: bool,
    pub summary: MetricsSummary,
    pub outcomes: Vec<TargetOutcome>,
}

impl BatchReport {
    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(TargetOutcome::is_failure)
    }

    /// Outcomes of the given kind, in completion order.
    pub fn outcomes_of(&self, kind: OutcomeKind) -> impl Iterator<Item = &TargetOutcome> {
        self.outcomes
            .iter()
            .filter(move |outcome| outcome.status.kind() == kind)
    }

    /// Writes the report as formatted JSON, creating parent directories.
    pub async fn persist(&self, path: &Path) -> Result<(), ReportError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        tracing::info!(batch_id = %self.batch_id, "Wrote batch report to {}", path.display());
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self, ReportError> {
        let json = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&json)?)
    }
}
