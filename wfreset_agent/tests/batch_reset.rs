//! End-to-end tests of the batch engine against the in-memory service.

use std::path::Path;
use std::sync::Arc;

use wfreset_agent::{AgentError, BatchOrchestrator, BatchReport, OutcomeStatus};
use wfreset_core::types::HistoryEventView as E;
use wfreset_core::{
    AutoResetPoint, BatchResetConfig, EventType, ExclusionSet, InMemoryService, ReapplyPolicy,
    ResetError, ResetStrategy, RpcMethod, RunFixture, ServiceError, SkipReason, TargetInput,
    TargetSource, TaskFailedCause, WorkflowRef,
};
use wfreset_runtime::{OutcomeKind, RuntimeConfig};

/// Started, one completed workflow task at 4.
fn simple_history() -> Vec<E> {
    vec![
        E::started(1, None),
        E::task_scheduled(2),
        E::new(3, EventType::WorkflowTaskStarted),
        E::task_completed(4, 2),
    ]
}

async fn write_input(dir: &Path, name: &str, contents: &str) -> TargetInput {
    let path = dir.join(name);
    tokio::fs::write(&path, contents).await.unwrap();
    TargetInput::File {
        path,
        separator: "\t".to_string(),
    }
}

async fn run_batch(
    service: &Arc<InMemoryService>,
    config: BatchResetConfig,
    input: &TargetInput,
    exclusions: ExclusionSet,
) -> Result<BatchReport, AgentError> {
    let orchestrator = BatchOrchestrator::new(service.clone(), config, RuntimeConfig::immediate())?
        .with_operator("ops");
    let source = TargetSource::open(input, service.clone(), "default", Arc::new(exclusions)).await?;
    orchestrator.run(source).await
}

fn status_of<'r>(report: &'r BatchReport, workflow_id: &str) -> &'r OutcomeStatus {
    &report
        .outcomes
        .iter()
        .find(|o| o.workflow_id == workflow_id)
        .unwrap_or_else(|| panic!("no outcome for {workflow_id}"))
        .status
}

fn anchor_of(status: &OutcomeStatus) -> (String, i64) {
    match status {
        OutcomeStatus::Reset {
            anchor_run_id,
            event_id,
            ..
        }
        | OutcomeStatus::DryRun {
            anchor_run_id,
            event_id,
        } => (anchor_run_id.clone(), *event_id),
        other => panic!("expected an anchor, got {other:?}"),
    }
}

#[tokio::test]
async fn test_file_batch_resolves_expected_anchors() {
    let temp = tempfile::tempdir().unwrap();
    let service = Arc::new(
        InMemoryService::new()
            .with_run(RunFixture::new("wf-1", "run-A").with_history(vec![
                E::task_scheduled(5),
                E::task_completed(6, 5),
            ]))
            .with_run(RunFixture::new("wf-2", "run-B").with_history(simple_history())),
    );
    let input = write_input(temp.path(), "input.tsv", "wf-1\trun-A\nwf-2\n").await;
    let config = BatchResetConfig::new("bad deploy", ResetStrategy::LastWorkflowTask)
        .with_reapply_policy(ReapplyPolicy::Signal);

    let report = run_batch(&service, config, &input, ExclusionSet::new())
        .await
        .unwrap();

    assert_eq!(report.outcomes.len(), 2);
    assert!(!report.has_failures());
    assert_eq!(anchor_of(status_of(&report, "wf-1")), ("run-A".to_string(), 6));
    assert_eq!(anchor_of(status_of(&report, "wf-2")), ("run-B".to_string(), 4));

    let calls = service.reset_calls();
    assert_eq!(calls.len(), 2);
    for call in &calls {
        assert_eq!(call.reason, "ops:bad deploy");
        assert_eq!(call.reapply_policy, ReapplyPolicy::Signal);
        assert_eq!(call.namespace, "default");
    }
}

#[tokio::test]
async fn test_scheduled_only_history_anchors_after_schedule() {
    let temp = tempfile::tempdir().unwrap();
    let service = Arc::new(
        InMemoryService::new()
            .with_run(RunFixture::new("wf-3", "run-C").with_history(vec![E::task_scheduled(1)])),
    );
    let input = write_input(temp.path(), "input.tsv", "wf-3\n").await;

    for strategy in [ResetStrategy::LastWorkflowTask, ResetStrategy::FirstWorkflowTask] {
        let config = BatchResetConfig::new("probe", strategy).with_dry_run(true);
        let report = run_batch(&service, config, &input, ExclusionSet::new())
            .await
            .unwrap();

        assert_eq!(anchor_of(status_of(&report, "wf-3")), ("run-C".to_string(), 2));
        assert_eq!(report.outcomes[0].run_id, None);
    }
}

#[tokio::test]
async fn test_non_deterministic_filter() {
    let temp = tempfile::tempdir().unwrap();
    let mut failing = simple_history();
    failing.extend([
        E::task_scheduled(5),
        E::new(6, EventType::WorkflowTaskStarted),
        E::task_failed(7, TaskFailedCause::WorkerUnhandledFailure, None),
    ]);
    let mut recovered = failing.clone();
    recovered.extend([
        E::task_scheduled(8),
        E::new(9, EventType::WorkflowTaskStarted),
        E::task_completed(10, 8),
    ]);

    let service = Arc::new(
        InMemoryService::new()
            .with_run(RunFixture::new("stuck", "run-1").with_history(failing))
            .with_run(RunFixture::new("healthy", "run-2").with_history(recovered)),
    );
    let input = write_input(temp.path(), "input.tsv", "stuck\nhealthy\n").await;
    let config = BatchResetConfig::new("nondeterminism", ResetStrategy::LastWorkflowTask)
        .with_non_deterministic_only(true);

    let report = run_batch(&service, config, &input, ExclusionSet::new())
        .await
        .unwrap();

    assert_eq!(anchor_of(status_of(&report, "stuck")), ("run-1".to_string(), 6));
    assert_eq!(
        status_of(&report, "healthy"),
        &OutcomeStatus::Skipped {
            reason: SkipReason::NotNonDeterministic
        }
    );
    assert_eq!(service.reset_calls().len(), 1);
}

#[tokio::test]
async fn test_open_and_stale_runs_are_skipped() {
    let temp = tempfile::tempdir().unwrap();
    let service = Arc::new(
        InMemoryService::new()
            .with_run(RunFixture::new("wf-old", "run-1").with_history(simple_history()))
            .with_run(RunFixture::new("wf-old", "run-2").with_history(simple_history()))
            .with_run(
                RunFixture::new("wf-open", "run-3")
                    .open()
                    .with_history(simple_history()),
            ),
    );
    let input = write_input(temp.path(), "input.tsv", "wf-old\trun-1\nwf-open\trun-3\n").await;
    let config = BatchResetConfig::new("cleanup", ResetStrategy::FirstWorkflowTask)
        .with_skip_if_open(true)
        .with_skip_if_base_not_current(true);

    let report = run_batch(&service, config, &input, ExclusionSet::new())
        .await
        .unwrap();

    assert_eq!(
        status_of(&report, "wf-old"),
        &OutcomeStatus::Skipped {
            reason: SkipReason::BaseNotCurrent {
                current_run_id: "run-2".to_string()
            }
        }
    );
    assert_eq!(
        status_of(&report, "wf-open"),
        &OutcomeStatus::Skipped {
            reason: SkipReason::CurrentRunOpen {
                current_run_id: "run-3".to_string()
            }
        }
    );
    assert_eq!(report.summary.skipped, 2);
    assert!(service.reset_calls().is_empty());
}

#[tokio::test]
async fn test_line_without_run_id_is_skipped_when_base_must_be_current() {
    let temp = tempfile::tempdir().unwrap();
    let service = Arc::new(
        InMemoryService::new()
            .with_run(RunFixture::new("wf-bare", "run-1").with_history(simple_history())),
    );
    let input = write_input(temp.path(), "input.tsv", "wf-bare\n").await;
    let config = BatchResetConfig::new("cleanup", ResetStrategy::FirstWorkflowTask)
        .with_skip_if_base_not_current(true);

    let report = run_batch(&service, config, &input, ExclusionSet::new())
        .await
        .unwrap();

    assert_eq!(
        status_of(&report, "wf-bare"),
        &OutcomeStatus::Skipped {
            reason: SkipReason::BaseNotCurrent {
                current_run_id: "run-1".to_string()
            }
        }
    );
    assert!(service.reset_calls().is_empty());
}

#[tokio::test]
async fn test_dry_run_never_resets() {
    let temp = tempfile::tempdir().unwrap();
    let strategies = [
        ResetStrategy::LastWorkflowTask,
        ResetStrategy::FirstWorkflowTask,
        ResetStrategy::LastContinuedAsNew,
        ResetStrategy::BadBinary {
            checksum: "bad".to_string(),
        },
    ];

    for strategy in strategies {
        let service = Arc::new(
            InMemoryService::new()
                .with_run(RunFixture::new("wf", "gen-1").with_history(simple_history()))
                .with_run(
                    RunFixture::new("wf", "gen-2")
                        .with_history(vec![E::started(1, Some("gen-1")), E::task_scheduled(2)])
                        .with_reset_points(vec![
                            AutoResetPoint::new("bad", 2),
                            AutoResetPoint::new("good", 2),
                        ]),
                ),
        );
        let input = write_input(temp.path(), "input.tsv", "wf\n").await;
        let config = BatchResetConfig::new("rehearsal", strategy.clone()).with_dry_run(true);

        let report = run_batch(&service, config, &input, ExclusionSet::new())
            .await
            .unwrap();

        assert!(
            matches!(report.outcomes[0].status, OutcomeStatus::DryRun { .. }),
            "{strategy}: {:?}",
            report.outcomes[0].status
        );
        assert_eq!(service.call_count(RpcMethod::Reset), 0, "{strategy}");
    }
}

#[tokio::test]
async fn test_excluded_targets_never_reach_the_service() {
    let temp = tempfile::tempdir().unwrap();
    let service = Arc::new(
        InMemoryService::new()
            .with_run(RunFixture::new("keep", "run-1").with_history(simple_history()))
            .with_run(RunFixture::new("skip-a", "run-2").with_history(simple_history()))
            .with_run(RunFixture::new("skip-b", "run-3").with_history(simple_history())),
    );
    let input = write_input(temp.path(), "input.tsv", "skip-a\nkeep\nskip-b\trun-3\n").await;
    let exclusions: ExclusionSet = ["skip-a", "skip-b"]
        .into_iter()
        .map(String::from)
        .collect();
    let config = BatchResetConfig::new("partial", ResetStrategy::LastWorkflowTask);

    let report = run_batch(&service, config, &input, exclusions).await.unwrap();

    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.outcomes_of(OutcomeKind::Excluded).count(), 2);
    // One describe and one history scan, both for "keep".
    assert_eq!(service.call_count(RpcMethod::Describe), 1);
    assert_eq!(service.call_count(RpcMethod::GetHistory), 1);
    let calls = service.reset_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].workflow_id, "keep");
}

#[tokio::test]
async fn test_every_target_gets_one_outcome_for_any_parallelism() {
    let temp = tempfile::tempdir().unwrap();
    let targets = 25;
    let lines: String = (0..targets).map(|i| format!("wf-{i}\n")).collect();
    let input = write_input(temp.path(), "input.tsv", &lines).await;

    for parallelism in [1, 2, 4, 8, 32] {
        let mut service = InMemoryService::new();
        for i in 0..targets {
            service = service
                .with_run(RunFixture::new(format!("wf-{i}"), format!("run-{i}")).with_history(simple_history()));
        }
        // A few targets fail permanently; they still count.
        service = service.with_page_size(3);
        let service = Arc::new(service);
        service.fail_next(RpcMethod::Reset, "wf-3", ServiceError::invalid_argument("no"));
        service.fail_next(RpcMethod::Describe, "wf-7", ServiceError::not_found("gone"));

        let config = BatchResetConfig::new("bulk", ResetStrategy::LastWorkflowTask)
            .with_parallelism(parallelism);
        let report = run_batch(&service, config, &input, ExclusionSet::new())
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), targets, "parallelism {parallelism}");
        assert_eq!(report.summary.processed, targets as u64);
        assert_eq!(report.summary.failed, 2);
        assert_eq!(service.reset_calls().len(), targets - 2);
    }
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let temp = tempfile::tempdir().unwrap();
    let service = Arc::new(
        InMemoryService::new()
            .with_run(RunFixture::new("flaky", "run-1").with_history(simple_history()))
            .with_run(RunFixture::new("rejected", "run-2").with_history(simple_history())),
    );
    service.fail_next(RpcMethod::Describe, "flaky", ServiceError::unavailable("blip"));
    service.fail_next(RpcMethod::GetHistory, "flaky", ServiceError::deadline_exceeded("slow"));
    service.fail_next(
        RpcMethod::Reset,
        "rejected",
        ServiceError::invalid_argument("event is not resettable"),
    );
    let input = write_input(temp.path(), "input.tsv", "flaky\nrejected\n").await;
    let config = BatchResetConfig::new("retry", ResetStrategy::LastWorkflowTask);

    let report = run_batch(&service, config, &input, ExclusionSet::new())
        .await
        .unwrap();

    let flaky = report.outcomes.iter().find(|o| o.workflow_id == "flaky").unwrap();
    assert!(matches!(flaky.status, OutcomeStatus::Reset { .. }));
    assert_eq!(flaky.attempts, 3);

    let rejected = report
        .outcomes
        .iter()
        .find(|o| o.workflow_id == "rejected")
        .unwrap();
    assert!(rejected.is_failure());
    assert_eq!(rejected.attempts, 1);

    assert_eq!(report.summary.retries, 2);
    assert!(report.has_failures());
}

#[tokio::test]
async fn test_retry_budget_is_bounded() {
    let temp = tempfile::tempdir().unwrap();
    let service = Arc::new(
        InMemoryService::new().with_run(RunFixture::new("down", "run-1").with_history(simple_history())),
    );
    for _ in 0..5 {
        service.fail_next(RpcMethod::Describe, "down", ServiceError::unavailable("down"));
    }
    let input = write_input(temp.path(), "input.tsv", "down\n").await;
    let config = BatchResetConfig::new("retry", ResetStrategy::LastWorkflowTask);

    let report = run_batch(&service, config, &input, ExclusionSet::new())
        .await
        .unwrap();

    assert_eq!(report.outcomes[0].attempts, 3);
    assert!(report.outcomes[0].is_failure());
    assert_eq!(service.call_count(RpcMethod::Describe), 3);
}

#[tokio::test]
async fn test_malformed_line_stops_the_batch_after_draining() {
    let temp = tempfile::tempdir().unwrap();
    let service = Arc::new(
        InMemoryService::new().with_run(RunFixture::new("wf-1", "run-1").with_history(simple_history())),
    );
    let path = temp.path().join("input.csv");
    tokio::fs::write(&path, "wf-1\n,run-X\nwf-2\n").await.unwrap();
    let input = TargetInput::File {
        path,
        separator: ",".to_string(),
    };
    let config = BatchResetConfig::new("broken input", ResetStrategy::LastWorkflowTask);

    let err = run_batch(&service, config, &input, ExclusionSet::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AgentError::Core(ResetError::MalformedLine { line: 2 })
    ));
    // The target queued before the bad line was still processed.
    assert_eq!(service.reset_calls().len(), 1);
}

#[tokio::test]
async fn test_query_batch_with_flaky_scan() {
    let refs = vec![
        WorkflowRef::current("q-1"),
        WorkflowRef::current("q-2"),
        WorkflowRef::current("q-3"),
    ];
    let mut service = InMemoryService::new()
        .with_visibility("WorkflowType='billing'", refs.clone())
        .with_page_size(2);
    for r in &refs {
        service = service.with_run(RunFixture::new(r.workflow_id.clone(), "run").with_history(simple_history()));
    }
    let service = Arc::new(service);
    service.fail_next(
        RpcMethod::Scan,
        "WorkflowType='billing'",
        ServiceError::unavailable("visibility store busy"),
    );
    let config = BatchResetConfig::new("billing fix", ResetStrategy::FirstWorkflowTask)
        .with_parallelism(2)
        .with_dry_run(true);

    let report = run_batch(
        &service,
        config,
        &TargetInput::Query("WorkflowType='billing'".to_string()),
        ExclusionSet::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.outcomes.len(), 3);
    assert_eq!(report.outcomes_of(OutcomeKind::DryRun).count(), 3);
    assert_eq!(report.summary.retries, 1);
    assert_eq!(service.call_count(RpcMethod::Scan), 3);
}

#[tokio::test]
async fn test_bad_binary_strategy() {
    let temp = tempfile::tempdir().unwrap();
    let mut history = simple_history();
    history.extend([E::task_scheduled(5), E::new(6, EventType::WorkflowTaskStarted), E::task_completed(7, 5)]);
    let service = Arc::new(
        InMemoryService::new()
            .with_run(
                RunFixture::new("mixed", "run-1")
                    .with_history(history.clone())
                    .with_reset_points(vec![
                        AutoResetPoint::new("deadbeef", 7),
                        AutoResetPoint::new("cafe", 4),
                    ]),
            )
            .with_run(
                RunFixture::new("all-bad", "run-2")
                    .with_history(history)
                    .with_reset_points(vec![AutoResetPoint::new("deadbeef", 4)]),
            ),
    );
    let input = write_input(temp.path(), "input.tsv", "mixed\nall-bad\n").await;
    let config = BatchResetConfig::new(
        "bad binary",
        ResetStrategy::BadBinary {
            checksum: "deadbeef".to_string(),
        },
    );

    let report = run_batch(&service, config, &input, ExclusionSet::new())
        .await
        .unwrap();

    assert_eq!(anchor_of(status_of(&report, "mixed")), ("run-1".to_string(), 4));
    let all_bad = report.outcomes.iter().find(|o| o.workflow_id == "all-bad").unwrap();
    assert!(all_bad.is_failure());
    // Resolution failures are not retried.
    assert_eq!(all_bad.attempts, 1);
}

#[tokio::test]
async fn test_last_continued_as_new_targets_previous_run() {
    let temp = tempfile::tempdir().unwrap();
    let service = Arc::new(
        InMemoryService::new()
            .with_run(RunFixture::new("chain", "gen-1").with_history(simple_history()))
            .with_run(RunFixture::new("chain", "gen-2").with_history(vec![
                E::started(1, Some("gen-1")),
                E::task_scheduled(2),
                E::new(3, EventType::WorkflowTaskStarted),
                E::task_completed(4, 2),
            ]))
            .with_run(RunFixture::new("root", "only").with_history(simple_history())),
    );
    let input = write_input(temp.path(), "input.tsv", "chain\nroot\n").await;
    let config = BatchResetConfig::new("redo", ResetStrategy::LastContinuedAsNew);

    let report = run_batch(&service, config, &input, ExclusionSet::new())
        .await
        .unwrap();

    assert_eq!(anchor_of(status_of(&report, "chain")), ("gen-1".to_string(), 4));
    let root = report.outcomes.iter().find(|o| o.workflow_id == "root").unwrap();
    assert!(root.is_failure());
    assert_eq!(root.attempts, 1);
}
