//! wfreset runtime layer - retries, deadlines and metrics.
//!
//! This crate provides the execution policies the batch engine applies around
//! every target:
//!
//! - Retry with random jitter, bounded by an attempt budget
//! - Per-call deadlines as a [`WorkflowService`](wfreset_core::WorkflowService) decorator
//! - Lock-free batch metrics shared by all workers

use std::time::Duration;

pub mod deadline;
pub mod metrics;
pub mod retry;

pub use deadline::{DeadlineConfig, DeadlineService};
pub use metrics::{BatchMetrics, MetricsSummary, OutcomeKind};
pub use retry::{execute_with_retry, jitter, RetryConfig, RetryOutcome};

/// Runtime configuration for a batch run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Per-target retry policy
    pub retry: RetryConfig,
    /// Per-RPC deadline
    pub deadline: DeadlineConfig,
    /// Upper bound of the random pause a worker takes after each target.
    /// Zero disables pacing.
    pub pacing: Duration,
    /// Capacity of the queue between the producer and the workers
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            deadline: DeadlineConfig::default(),
            pacing: Duration::from_secs(1),
            queue_capacity: 64,
        }
    }
}

impl RuntimeConfig {
    /// No pauses anywhere. Used by tests and offline rehearsals.
    pub fn immediate() -> Self {
        Self {
            retry: RetryConfig::default().with_max_jitter(Duration::ZERO),
            pacing: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_deadline(mut self, deadline: DeadlineConfig) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_config_default() {
        let config = RuntimeConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.deadline.duration(), Duration::from_secs(5));
        assert_eq!(config.pacing, Duration::from_secs(1));
    }

    #[test]
    fn test_immediate_config_never_sleeps() {
        let config = RuntimeConfig::immediate().with_queue_capacity(0);
        assert_eq!(config.retry.max_jitter, Duration::ZERO);
        assert_eq!(config.pacing, Duration::ZERO);
        assert_eq!(config.queue_capacity, 1);
    }
}
