//! Bounded-concurrency batch reset engine.
//!
//! The orchestrator pulls targets from a [`TargetSource`] inline and hands them
//! to `parallelism` workers over a bounded queue. Each worker runs the
//! per-target pipeline
//!
//! ```text
//! SafetyFilter -> ResetPointResolver -> dry-run log | ResetExecution
//! ```
//!
//! under the retry policy, prints the terminal outcome and moves on. Dropping
//! the queue sender tells the workers the source is exhausted; the batch
//! returns once every worker has drained the queue and exited.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::Instant;
use uuid::Uuid;
use wfreset_core::service::{DescribeRequest, ResetRequest};
use wfreset_core::{
    BatchResetConfig, ResetAnchor, ResetError, ResetPointResolver, SourceItem, TargetSource,
    Verdict, WorkflowRef, WorkflowService,
};
use wfreset_runtime::{
    execute_with_retry, jitter, BatchMetrics, OutcomeKind, RetryConfig, RetryOutcome,
    RuntimeConfig,
};

use crate::report::{BatchReport, OutcomeStatus, TargetOutcome};
use crate::Result;

/// Environment variables consulted, in order, for the operator name.
const USER_VARS: [&str; 3] = ["USER", "LOGNAME", "USERNAME"];

/// Name of the operator recorded in reset reasons, `unknown` if not set.
pub fn operator_name() -> String {
    USER_VARS
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// How the pipeline reaches an anchor.
#[derive(Clone, Copy, Debug)]
enum Pipeline {
    /// Safety filter, then the configured strategy
    Filtered,
    /// No safety filter; an explicit event id or the configured strategy
    Direct { event_id: Option<i64> },
}

/// Batch reset orchestrator.
///
/// Generic over the service handle so tests can drive it with
/// [`InMemoryService`](wfreset_core::InMemoryService).
pub struct BatchOrchestrator<S: WorkflowService + ?Sized + 'static> {
    service: Arc<S>,
    config: Arc<BatchResetConfig>,
    runtime: RuntimeConfig,
    metrics: BatchMetrics,
    operator: String,
}

impl<S: WorkflowService + ?Sized + 'static> BatchOrchestrator<S> {
    /// Creates an orchestrator. The configuration is validated here so
    /// nothing runs with an invalid setup.
    pub fn new(service: Arc<S>, config: BatchResetConfig, runtime: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            service,
            config: Arc::new(config),
            runtime,
            metrics: BatchMetrics::new(),
            operator: operator_name(),
        })
    }

    /// Overrides the operator name taken from the environment.
    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = operator.into();
        self
    }

    pub fn config(&self) -> &BatchResetConfig {
        &self.config
    }

    pub fn metrics(&self) -> &BatchMetrics {
        &self.metrics
    }

    /// Processes every target of `source`.
    ///
    /// Target failures are recorded as outcomes. A source error stops
    /// production, lets the workers drain what was already queued and is then
    /// returned.
    pub async fn run(&self, mut source: TargetSource<S>) -> Result<BatchReport> {
        let started_at = Utc::now();
        let batch_id = Uuid::new_v4();
        tracing::info!(
            %batch_id,
            namespace = %self.config.namespace,
            strategy = %self.config.strategy,
            parallelism = self.config.parallelism,
            dry_run = self.config.dry_run,
            "Starting batch reset"
        );

        let worker = self.worker();
        let (tx, rx) = mpsc::channel::<WorkflowRef>(self.runtime.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = JoinSet::new();
        for index in 0..self.config.parallelism {
            let worker = Arc::clone(&worker);
            let rx = Arc::clone(&rx);
            workers.spawn(async move { worker.drain(index, rx).await });
        }

        let mut outcomes = Vec::new();
        let produced = self.produce(&mut source, &tx, &mut outcomes).await;
        drop(tx);

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(mut drained) => outcomes.append(&mut drained),
                Err(e) => tracing::error!(error = %e, "Worker task aborted"),
            }
        }

        let summary = self.metrics.summary();
        match produced {
            Ok(enqueued) => {
                tracing::info!(%batch_id, enqueued, %summary, "Batch reset finished");
                Ok(BatchReport {
                    batch_id,
                    started_at,
                    finished_at: Utc::now(),
                    dry_run: self.config.dry_run,
                    summary,
                    outcomes,
                })
            }
            Err(err) => {
                tracing::error!(%batch_id, error = %err, %summary, "Target source failed, batch stopped");
                Err(err.into())
            }
        }
    }

    /// Resets a single execution without the safety filter.
    ///
    /// With `event_id` the anchor is that event of the given (or current) run,
    /// otherwise the configured strategy decides.
    pub async fn reset_one(&self, target: &WorkflowRef, event_id: Option<i64>) -> TargetOutcome {
        let outcome = self
            .worker()
            .process(target, Pipeline::Direct { event_id })
            .await;
        println!("{outcome}");
        outcome
    }

    fn worker(&self) -> Arc<TargetWorker<S>> {
        Arc::new(TargetWorker {
            service: Arc::clone(&self.service),
            config: Arc::clone(&self.config),
            retry: self.runtime.retry.clone(),
            pacing: self.runtime.pacing,
            metrics: self.metrics.clone(),
            reason: format!("{}:{}", self.operator, self.config.reason),
        })
    }

    /// Feeds the queue until the source is exhausted. Excluded targets are
    /// reported here and never enqueued.
    async fn produce(
        &self,
        source: &mut TargetSource<S>,
        tx: &mpsc::Sender<WorkflowRef>,
        outcomes: &mut Vec<TargetOutcome>,
    ) -> wfreset_core::Result<usize> {
        let mut enqueued = 0;
        while let Some(item) = self.next_item(source).await? {
            match item {
                SourceItem::Excluded(target) => {
                    tracing::info!(workflow_id = %target.workflow_id, "Workflow is excluded, skipped");
                    let outcome = TargetOutcome::excluded(&target);
                    self.metrics.record(OutcomeKind::Excluded);
                    println!("{outcome}");
                    outcomes.push(outcome);
                }
                SourceItem::Target(target) => {
                    if tx.send(target).await.is_err() {
                        tracing::warn!("All workers exited, stopping production");
                        break;
                    }
                    enqueued += 1;
                }
            }
        }
        Ok(enqueued)
    }

    /// Pulls the next source item, retrying transient page failures.
    ///
    /// The source stays on a failed page, so calling it again refetches that
    /// page.
    async fn next_item(
        &self,
        source: &mut TargetSource<S>,
    ) -> wfreset_core::Result<Option<SourceItem>> {
        let max_attempts = self.runtime.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match source.next().await {
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let pause = jitter(self.runtime.retry.max_jitter);
                    tracing::warn!(attempt, max_attempts, error = %err, "Source page failed, retrying in {:?}", pause);
                    self.metrics.record(OutcomeKind::Retry);
                    tokio::time::sleep(pause).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

/// State shared by all workers of one batch.
struct TargetWorker<S: WorkflowService + ?Sized> {
    service: Arc<S>,
    config: Arc<BatchResetConfig>,
    retry: RetryConfig,
    pacing: Duration,
    metrics: BatchMetrics,
    /// `<operator>:<reason>`
    reason: String,
}

impl<S: WorkflowService + ?Sized> TargetWorker<S> {
    async fn drain(
        self: Arc<Self>,
        index: usize,
        queue: Arc<Mutex<mpsc::Receiver<WorkflowRef>>>,
    ) -> Vec<TargetOutcome> {
        let mut outcomes = Vec::new();
        loop {
            let next = queue.lock().await.recv().await;
            let Some(target) = next else { break };

            let outcome = self.process(&target, Pipeline::Filtered).await;
            println!("{outcome}");
            outcomes.push(outcome);
            self.pace().await;
        }
        tracing::debug!(worker = index, processed = outcomes.len(), "Worker finished");
        outcomes
    }

    /// Runs the pipeline for one target under the retry policy.
    ///
    /// The request id is fixed for the target so a retried reset stays
    /// idempotent on the service side.
    async fn process(&self, target: &WorkflowRef, pipeline: Pipeline) -> TargetOutcome {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        let request_id = request_id.as_str();

        let RetryOutcome { result, attempts } = execute_with_retry(
            move |attempt| self.attempt(target, request_id, pipeline, attempt),
            &self.retry,
            ResetError::is_retryable,
        )
        .await;
        self.metrics
            .record_retries(u64::from(attempts.saturating_sub(1)));

        let status = match result {
            Ok(status) => status,
            Err(err) => {
                tracing::error!(
                    workflow_id = %target.workflow_id,
                    run_id = target.run_id_or_empty(),
                    attempts,
                    error = %err,
                    "Failed to reset workflow"
                );
                OutcomeStatus::Failed {
                    error: err.to_string(),
                }
            }
        };
        self.metrics.record_timing(status.kind(), started.elapsed());
        TargetOutcome::new(target, status, attempts)
    }

    async fn attempt(
        &self,
        target: &WorkflowRef,
        request_id: &str,
        pipeline: Pipeline,
        attempt: u32,
    ) -> wfreset_core::Result<OutcomeStatus> {
        tracing::debug!(
            workflow_id = %target.workflow_id,
            run_id = target.run_id_or_empty(),
            attempt,
            "Processing workflow"
        );
        let namespace = self.config.namespace.as_str();
        let resolver = ResetPointResolver::new(&*self.service, namespace);

        let anchor = match pipeline {
            Pipeline::Filtered => {
                let verdict = self
                    .config
                    .safety_filter()
                    .check(&*self.service, namespace, target)
                    .await?;
                let run_id = match verdict {
                    Verdict::Skip(reason) => {
                        tracing::info!(
                            workflow_id = %target.workflow_id,
                            run_id = target.run_id_or_empty(),
                            %reason,
                            "Skipped workflow"
                        );
                        return Ok(OutcomeStatus::Skipped { reason });
                    }
                    Verdict::Proceed { run_id } => run_id,
                };
                resolver
                    .resolve(&target.workflow_id, &run_id, &self.config.strategy)
                    .await?
            }
            Pipeline::Direct { event_id: None } => {
                resolver.resolve_ref(target, &self.config.strategy).await?
            }
            Pipeline::Direct {
                event_id: Some(event_id),
            } => {
                let run_id = match &target.run_id {
                    Some(run_id) => run_id.clone(),
                    None => {
                        self.service
                            .describe_execution(DescribeRequest {
                                namespace: namespace.to_string(),
                                workflow_id: target.workflow_id.clone(),
                                run_id: None,
                            })
                            .await?
                            .current_run_id
                    }
                };
                ResetAnchor::new(run_id, event_id)?
            }
        };

        self.submit(&target.workflow_id, anchor, request_id).await
    }

    async fn submit(
        &self,
        workflow_id: &str,
        anchor: ResetAnchor,
        request_id: &str,
    ) -> wfreset_core::Result<OutcomeStatus> {
        if self.config.dry_run {
            tracing::info!(
                workflow_id,
                anchor_run_id = %anchor.anchor_run_id,
                event_id = anchor.event_id,
                "Dry run, reset not submitted"
            );
            return Ok(OutcomeStatus::dry_run(&anchor));
        }

        let response = self
            .service
            .reset_execution(ResetRequest {
                namespace: self.config.namespace.clone(),
                workflow_id: workflow_id.to_string(),
                run_id: anchor.anchor_run_id.clone(),
                event_id: anchor.event_id,
                reason: self.reason.clone(),
                request_id: request_id.to_string(),
                reapply_policy: self.config.reapply_policy,
            })
            .await?;
        tracing::info!(
            workflow_id,
            anchor_run_id = %anchor.anchor_run_id,
            event_id = anchor.event_id,
            new_run_id = %response.new_run_id,
            "Reset workflow"
        );
        Ok(OutcomeStatus::reset(&anchor, response.new_run_id))
    }

    /// Random pause after each target to spread load on the service.
    async fn pace(&self) {
        let pause = jitter(self.pacing);
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wfreset_core::types::HistoryEventView as E;
    use wfreset_core::{EventType, InMemoryService, ResetStrategy, RpcMethod, RunFixture};

    fn service() -> Arc<InMemoryService> {
        Arc::new(
            InMemoryService::new().with_run(
                RunFixture::new("wf-1", "run-A").with_history(vec![
                    E::started(1, None),
                    E::task_scheduled(2),
                    E::task_completed(4, 2),
                    E::task_scheduled(5),
                    E::new(6, EventType::WorkflowTaskStarted),
                ]),
            ),
        )
    }

    fn orchestrator(
        service: Arc<InMemoryService>,
        config: BatchResetConfig,
    ) -> BatchOrchestrator<InMemoryService> {
        BatchOrchestrator::new(service, config, RuntimeConfig::immediate())
            .unwrap()
            .with_operator("alice")
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = BatchResetConfig::new("", ResetStrategy::LastWorkflowTask);
        let result = BatchOrchestrator::new(service(), config, RuntimeConfig::immediate());
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_reset_one_with_explicit_event() {
        let service = service();
        let config = BatchResetConfig::new("rollback", ResetStrategy::LastWorkflowTask);
        let orchestrator = orchestrator(service.clone(), config);

        let outcome = orchestrator
            .reset_one(&WorkflowRef::current("wf-1"), Some(4))
            .await;

        assert!(matches!(
            outcome.status,
            OutcomeStatus::Reset { ref anchor_run_id, event_id: 4, .. } if anchor_run_id == "run-A"
        ));
        let calls = service.reset_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].reason, "alice:rollback");
        assert_eq!(service.call_count(RpcMethod::Describe), 1);
    }

    #[tokio::test]
    async fn test_reset_one_by_strategy() {
        let service = service();
        let config = BatchResetConfig::new("rollback", ResetStrategy::LastWorkflowTask);
        let orchestrator = orchestrator(service.clone(), config);

        let target = WorkflowRef::new("wf-1", Some("run-A".to_string()));
        let outcome = orchestrator.reset_one(&target, None).await;

        // Trailing scheduled task 5 moves the anchor to 6.
        assert!(matches!(
            outcome.status,
            OutcomeStatus::Reset { event_id: 6, .. }
        ));
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_reset_one_rejects_event_zero() {
        let service = service();
        let config = BatchResetConfig::new("rollback", ResetStrategy::LastWorkflowTask);
        let orchestrator = orchestrator(service.clone(), config);

        let target = WorkflowRef::new("wf-1", Some("run-A".to_string()));
        let outcome = orchestrator.reset_one(&target, Some(0)).await;

        assert!(outcome.is_failure());
        assert_eq!(outcome.attempts, 1);
        assert!(service.reset_calls().is_empty());
    }

    #[tokio::test]
    async fn test_transient_reset_failure_is_retried() {
        let service = service();
        service.fail_next(
            RpcMethod::Reset,
            "wf-1",
            wfreset_core::ServiceError::deadline_exceeded("slow"),
        );
        let config = BatchResetConfig::new("rollback", ResetStrategy::LastWorkflowTask);
        let orchestrator = orchestrator(service.clone(), config);

        let target = WorkflowRef::new("wf-1", Some("run-A".to_string()));
        let outcome = orchestrator.reset_one(&target, Some(4)).await;

        assert_eq!(outcome.attempts, 2);
        assert_eq!(orchestrator.metrics().count(OutcomeKind::Retry), 1);
        assert_eq!(service.call_count(RpcMethod::Reset), 2);
        let calls = service.reset_calls();
        assert_eq!(calls.len(), 1);
        assert!(Uuid::parse_str(&calls[0].request_id).is_ok());
    }
}
