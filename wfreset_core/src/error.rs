//! Error types for the reset engine.

use std::fmt;
use std::path::PathBuf;

/// Closed classification of failures returned by the workflow service.
///
/// The retry classifier only ever looks at the kind, never at the message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ServiceErrorKind {
    /// The execution, run or namespace does not exist.
    NotFound,
    /// The request was rejected as semantically invalid.
    InvalidArgument,
    /// The per-call deadline elapsed before the service answered.
    DeadlineExceeded,
    /// Transport failure or the service is temporarily unavailable.
    Unavailable,
    /// Any other server-side failure.
    Internal,
}

impl fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServiceErrorKind::NotFound => "not found",
            ServiceErrorKind::InvalidArgument => "invalid argument",
            ServiceErrorKind::DeadlineExceeded => "deadline exceeded",
            ServiceErrorKind::Unavailable => "unavailable",
            ServiceErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Error returned by a [`WorkflowService`](crate::service::WorkflowService) call.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ServiceError {
    /// Classification used for retry decisions
    pub kind: ServiceErrorKind,
    /// Human readable detail from the service
    pub message: String,
}

impl ServiceError {
    pub fn new(kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::NotFound, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::InvalidArgument, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::DeadlineExceeded, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Internal, message)
    }

    /// Returns true if repeating the same call may succeed.
    ///
    /// Semantic rejections (`NotFound`, `InvalidArgument`) are final.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind,
            ServiceErrorKind::NotFound | ServiceErrorKind::InvalidArgument
        )
    }
}

/// Main error type for the reset engine.
///
/// All engine operations return `Result<T> = std::result::Result<T, ResetError>`.
#[derive(thiserror::Error, Debug)]
pub enum ResetError {
    /// Invalid batch configuration, detected before any processing starts.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input or exclude file could not be opened or read.
    #[error("Unable to read {path:?}: {source}")]
    InputFile {
        /// File that failed
        path: PathBuf,
        /// Underlying I/O failure
        source: std::io::Error,
    },

    /// An input line had no workflow id column.
    #[error("Malformed input at line {line}: missing workflow id")]
    MalformedLine {
        /// 1-indexed line number
        line: usize,
    },

    /// The history contains neither a scheduled nor a completed workflow task.
    #[error("No workflow task found in history of {workflow_id}/{run_id}")]
    NoTaskFound { workflow_id: String, run_id: String },

    /// LastContinuedAsNew was requested for a run that did not continue from another.
    #[error("Run {workflow_id}/{run_id} was not continued from a previous run")]
    NotContinued { workflow_id: String, run_id: String },

    /// No usable auto-reset point for the BadBinary strategy.
    #[error("No reset point available for {workflow_id}/{run_id}")]
    NoResetPoint { workflow_id: String, run_id: String },

    /// A computed anchor would point at event 0.
    #[error("Invalid reset anchor: event id must be >= 1, got {0}")]
    InvalidAnchor(i64),

    /// A history page could not be fetched.
    #[error("Failed to fetch history of {workflow_id}/{run_id}: {source}")]
    HistoryFetch {
        workflow_id: String,
        run_id: String,
        source: ServiceError,
    },

    /// Any other service call failed.
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ResetError {
    /// Returns true if the failure is transient and the target may be retried.
    ///
    /// Resolution failures are deterministic for a given history and are never
    /// retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ResetError::HistoryFetch { source, .. } => source.is_retryable(),
            ResetError::Service(source) => source.is_retryable(),
            ResetError::Io(_) => true,
            _ => false,
        }
    }

    /// Returns the service error kind behind this failure, if any.
    pub fn service_kind(&self) -> Option<ServiceErrorKind> {
        match self {
            ResetError::HistoryFetch { source, .. } | ResetError::Service(source) => {
                Some(source.kind)
            }
            _ => None,
        }
    }
}

/// Type alias for Result with ResetError.
pub type Result<T> = std::result::Result<T, ResetError>;
