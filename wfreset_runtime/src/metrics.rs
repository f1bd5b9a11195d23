//! Batch metrics: outcome counts, retries and elapsed time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Kind of event being counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    /// Reset request accepted by the service
    Reset,
    /// Anchor resolved, nothing submitted
    DryRun,
    /// Rejected by the safety filter
    Skipped,
    /// Listed in the exclusion set
    Excluded,
    /// Gave up on the target
    Failed,
    /// Extra attempt after a transient failure
    Retry,
}

const KINDS: usize = 6;

/// Lock-free batch metrics collector.
///
/// Clones share the same counters, so every worker can hold its own handle.
#[derive(Clone, Debug)]
pub struct BatchMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    counts: [AtomicU64; KINDS],
    /// Wall time spent inside per-target pipelines (nanoseconds)
    busy_ns: AtomicU64,
}

impl BatchMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                counts: std::array::from_fn(|_| AtomicU64::new(0)),
                busy_ns: AtomicU64::new(0),
            }),
        }
    }

    pub fn record(&self, kind: OutcomeKind) {
        self.inner.counts[kind as usize].fetch_add(1, Ordering::Relaxed);
    }

    /// Adds `n` retries at once.
    pub fn record_retries(&self, n: u64) {
        self.inner.counts[OutcomeKind::Retry as usize].fetch_add(n, Ordering::Relaxed);
    }

    /// Records a terminal outcome and the time the target took.
    pub fn record_timing(&self, kind: OutcomeKind, duration: Duration) {
        self.record(kind);
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.inner.busy_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn count(&self, kind: OutcomeKind) -> u64 {
        self.inner.counts[kind as usize].load(Ordering::Relaxed)
    }

    pub fn busy_time(&self) -> Duration {
        Duration::from_nanos(self.inner.busy_ns.load(Ordering::Relaxed))
    }

    /// Number of terminal outcomes recorded so far.
    pub fn processed(&self) -> u64 {
        [
            OutcomeKind::Reset,
            OutcomeKind::DryRun,
            OutcomeKind::Skipped,
            OutcomeKind::Excluded,
            OutcomeKind::Failed,
        ]
        .into_iter()
        .map(|kind| self.count(kind))
        .sum()
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            processed: self.processed(),
            reset: self.count(OutcomeKind::Reset),
            dry_run: self.count(OutcomeKind::DryRun),
            skipped: self.count(OutcomeKind::Skipped),
            excluded: self.count(OutcomeKind::Excluded),
            failed: self.count(OutcomeKind::Failed),
            retries: self.count(OutcomeKind::Retry),
            busy_time: self.busy_time(),
        }
    }
}

impl Default for BatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`BatchMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub processed: u64,
    pub reset: u64,
    pub dry_run: u64,
    pub skipped: u64,
    pub excluded: u64,
    pub failed: u64,
    pub retries: u64,
    /// Summed across workers, so it can exceed wall time
    pub busy_time: Duration,
}

impl std::fmt::Display for MetricsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "processed={} reset={} dry_run={} skipped={} excluded={} failed={} retries={}",
            self.processed,
            self.reset,
            self.dry_run,
            self.skipped,
            self.excluded,
            self.failed,
            self.retries
        )
    }
}
