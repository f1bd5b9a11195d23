//! Core types for the reset engine.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ResetError, Result};

/// Identifies one workflow execution.
///
/// A missing run id means "the current run of this workflow id".
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowRef {
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl WorkflowRef {
    /// Creates a reference to a specific run. An empty run id is treated as absent.
    pub fn new(workflow_id: impl Into<String>, run_id: Option<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.filter(|r| !r.is_empty()),
        }
    }

    /// Creates a reference to the current run of `workflow_id`.
    pub fn current(workflow_id: impl Into<String>) -> Self {
        Self::new(workflow_id, None)
    }

    /// Returns the run id, or `""` for the current run.
    pub fn run_id_or_empty(&self) -> &str {
        self.run_id.as_deref().unwrap_or("")
    }
}

impl fmt::Display for WorkflowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.run_id {
            Some(run_id) => write!(f, "{}/{}", self.workflow_id, run_id),
            None => write!(f, "{}/<current>", self.workflow_id),
        }
    }
}

/// How the reset anchor is located. Chosen once per batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetStrategy {
    /// Last completed workflow task, or the event after the last scheduled one.
    LastWorkflowTask,
    /// First completed workflow task, or the event after the first scheduled one.
    FirstWorkflowTask,
    /// Last workflow task of the run this run continued from.
    LastContinuedAsNew,
    /// Latest auto-reset point not produced by the given worker binary.
    BadBinary { checksum: String },
}

/// Strategy names accepted on the command line, without parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResetType {
    LastWorkflowTask,
    FirstWorkflowTask,
    LastContinuedAsNew,
    BadBinary,
}

impl ResetType {
    pub const ALL: [ResetType; 4] = [
        ResetType::LastWorkflowTask,
        ResetType::FirstWorkflowTask,
        ResetType::LastContinuedAsNew,
        ResetType::BadBinary,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResetType::LastWorkflowTask => "LastWorkflowTask",
            ResetType::FirstWorkflowTask => "FirstWorkflowTask",
            ResetType::LastContinuedAsNew => "LastContinuedAsNew",
            ResetType::BadBinary => "BadBinary",
        }
    }
}

impl fmt::Display for ResetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResetType {
    type Err = ResetError;

    fn from_str(s: &str) -> Result<Self> {
        ResetType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = ResetType::ALL.iter().map(|t| t.as_str()).collect();
                ResetError::Config(format!(
                    "reset type is not supported: {s} (expected one of {})",
                    names.join(", ")
                ))
            })
    }
}

impl ResetStrategy {
    /// Builds a strategy from its command-line name and optional checksum.
    ///
    /// The checksum is required for `BadBinary` and ignored otherwise.
    pub fn from_parts(reset_type: ResetType, bad_binary_checksum: Option<&str>) -> Result<Self> {
        match reset_type {
            ResetType::LastWorkflowTask => Ok(ResetStrategy::LastWorkflowTask),
            ResetType::FirstWorkflowTask => Ok(ResetStrategy::FirstWorkflowTask),
            ResetType::LastContinuedAsNew => Ok(ResetStrategy::LastContinuedAsNew),
            ResetType::BadBinary => match bad_binary_checksum.map(str::trim) {
                Some(checksum) if !checksum.is_empty() => Ok(ResetStrategy::BadBinary {
                    checksum: checksum.to_string(),
                }),
                _ => Err(ResetError::Config(
                    "option reset-bad-binary-checksum is required for BadBinary".to_string(),
                )),
            },
        }
    }

    pub fn reset_type(&self) -> ResetType {
        match self {
            ResetStrategy::LastWorkflowTask => ResetType::LastWorkflowTask,
            ResetStrategy::FirstWorkflowTask => ResetType::FirstWorkflowTask,
            ResetStrategy::LastContinuedAsNew => ResetType::LastContinuedAsNew,
            ResetStrategy::BadBinary { .. } => ResetType::BadBinary,
        }
    }
}

impl fmt::Display for ResetStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetStrategy::BadBinary { checksum } => write!(f, "BadBinary({checksum})"),
            other => f.write_str(other.reset_type().as_str()),
        }
    }
}

/// Which events the service re-applies after the reset point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReapplyPolicy {
    #[default]
    All,
    Signal,
    None,
}

impl FromStr for ReapplyPolicy {
    type Err = ResetError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "All" => Ok(ReapplyPolicy::All),
            "Signal" => Ok(ReapplyPolicy::Signal),
            "None" => Ok(ReapplyPolicy::None),
            other => Err(ResetError::Config(format!(
                "must specify valid reset reapply type: All, Signal, None (got {other})"
            ))),
        }
    }
}

/// History event kinds the resolver and safety filter distinguish.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    WorkflowExecutionStarted,
    WorkflowTaskScheduled,
    WorkflowTaskStarted,
    WorkflowTaskCompleted,
    WorkflowTaskFailed,
    WorkflowTaskTimedOut,
    ActivityTaskScheduled,
    ActivityTaskCompleted,
    TimerStarted,
    WorkflowExecutionSignaled,
    WorkflowExecutionCompleted,
    WorkflowExecutionFailed,
    WorkflowExecutionContinuedAsNew,
    #[serde(other)]
    Other,
}

/// Cause attached to a failed workflow task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskFailedCause {
    Unspecified,
    WorkerUnhandledFailure,
    NonDeterministicError,
    BadBinary,
    ResetWorkflow,
    #[serde(other)]
    Other,
}

/// Minimal projection of a history event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEventView {
    pub event_id: i64,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_task_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_task_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_cause: Option<TaskFailedCause>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continued_from_run_id: Option<String>,
}

impl HistoryEventView {
    pub fn new(event_id: i64, event_type: EventType) -> Self {
        Self {
            event_id,
            event_type,
            completed_task_id: None,
            scheduled_task_id: None,
            failure_cause: None,
            failure_message: None,
            continued_from_run_id: None,
        }
    }

    pub fn started(event_id: i64, continued_from_run_id: Option<&str>) -> Self {
        Self {
            continued_from_run_id: continued_from_run_id.map(str::to_string),
            ..Self::new(event_id, EventType::WorkflowExecutionStarted)
        }
    }

    pub fn task_scheduled(event_id: i64) -> Self {
        Self::new(event_id, EventType::WorkflowTaskScheduled)
    }

    pub fn task_completed(event_id: i64, scheduled_task_id: i64) -> Self {
        Self {
            scheduled_task_id: Some(scheduled_task_id),
            ..Self::new(event_id, EventType::WorkflowTaskCompleted)
        }
    }

    pub fn task_failed(event_id: i64, cause: TaskFailedCause, message: Option<&str>) -> Self {
        Self {
            failure_cause: Some(cause),
            failure_message: message.map(str::to_string),
            ..Self::new(event_id, EventType::WorkflowTaskFailed)
        }
    }
}

/// Service-maintained checkpoint tagged with a worker binary checksum.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoResetPoint {
    pub checksum: String,
    pub completed_task_id: i64,
    #[serde(default = "default_resettable")]
    pub resettable: bool,
}

fn default_resettable() -> bool {
    true
}

impl AutoResetPoint {
    pub fn new(checksum: impl Into<String>, completed_task_id: i64) -> Self {
        Self {
            checksum: checksum.into(),
            completed_task_id,
            resettable: true,
        }
    }
}

/// Subset of a describe-execution response used by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionDescription {
    pub current_run_id: String,
    pub is_open: bool,
    /// Most recent first
    #[serde(default)]
    pub auto_reset_points: Vec<AutoResetPoint>,
}

/// Run and event a reset rewinds to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResetAnchor {
    pub anchor_run_id: String,
    pub event_id: i64,
}

impl ResetAnchor {
    /// Creates an anchor, rejecting event ids below 1.
    pub fn new(anchor_run_id: impl Into<String>, event_id: i64) -> Result<Self> {
        if event_id < 1 {
            return Err(ResetError::InvalidAnchor(event_id));
        }
        Ok(Self {
            anchor_run_id: anchor_run_id.into(),
            event_id,
        })
    }
}

impl fmt::Display for ResetAnchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.anchor_run_id, self.event_id)
    }
}

/// Workflow ids that must never be reset. Read-only once built.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    ids: HashSet<String>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, workflow_id: &str) -> bool {
        self.ids.contains(workflow_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<String> for ExclusionSet {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}
