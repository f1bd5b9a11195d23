//! wfreset agent layer - batch reset orchestration.
//!
//! This crate drives the core engine over a whole batch:
//!
//! - Orchestration: bounded worker pool fed from a target source
//! - Per-target pipeline: safety filter, anchor resolution, reset or dry run
//! - Retry with jitter, pacing and per-call deadlines
//! - Outcome report with optional JSON persistence
//! - The `wfreset` command-line interface

pub mod cli;
pub mod logging;
pub mod orchestrator;
pub mod report;

/// Error types for agent operations.
#[derive(thiserror::Error, Debug)]
pub enum AgentError {
    /// Error from the core engine
    #[error(transparent)]
    Core(#[from] wfreset_core::ResetError),

    /// Report could not be written or read
    #[error("Report failed: {0}")]
    Report(#[from] report::ReportError),
}

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

pub use orchestrator::{operator_name, BatchOrchestrator};
pub use report::{BatchReport, OutcomeStatus, ReportError, TargetOutcome};
