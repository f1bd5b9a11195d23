//! Command-line interface for wfreset.
//!
//! # Examples
//!
//! Rehearse a batch against a fixture without touching anything:
//!
//! ```bash
//! $ wfreset --fixture prod-snapshot.json reset-batch \
//!     --input-file stuck.tsv --reason "bad deploy" \
//!     --reset-type LastWorkflowTask --non-deterministic --dry-run
//! ```
//!
//! Reset one execution to an explicit event:
//!
//! ```bash
//! $ wfreset reset --workflow-id order-42 --event-id 12 --reason "manual fix"
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand};
use wfreset_core::{
    load_exclusions, BatchResetConfig, ExclusionSet, InMemoryService, ReapplyPolicy,
    ResetError, ResetStrategy, ResetType, TargetInput, TargetSource, WorkflowRef,
    DEFAULT_SEPARATOR,
};
use wfreset_runtime::{DeadlineConfig, DeadlineService, RetryConfig, RuntimeConfig};

use crate::logging::{self, LogFormat};
use crate::orchestrator::BatchOrchestrator;

/// Service handle used by the CLI.
type CliService = DeadlineService<InMemoryService>;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "wfreset", version, about = "Reset workflow executions, one or in bulk")]
pub struct Cli {
    /// Namespace the workflows live in
    #[arg(long, global = true, env = "WFRESET_NAMESPACE", default_value = "default")]
    namespace: String,

    /// JSON service fixture to run against instead of a live cluster
    #[arg(long, global = true, env = "WFRESET_FIXTURE")]
    fixture: Option<PathBuf>,

    /// Deadline for each service call, in seconds
    #[arg(long, global = true, default_value_t = 5)]
    context_timeout: u64,

    /// Log output format (logs go to stderr)
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Reset a batch of workflows read from a file or a visibility query
    ResetBatch(ResetBatchArgs),

    /// Reset a single workflow execution
    Reset(ResetArgs),
}

#[derive(Args, Debug)]
struct ResetBatchArgs {
    /// File listing workflows to reset, one `workflowId[<sep>runId]` per line
    #[arg(long)]
    input_file: Option<PathBuf>,

    /// Visibility query selecting the workflows to reset
    #[arg(long, short = 'q')]
    query: Option<String>,

    /// File listing workflow ids that must not be reset
    #[arg(long)]
    exclude_file: Option<PathBuf>,

    /// Column separator of the input and exclude files
    #[arg(long, default_value = DEFAULT_SEPARATOR)]
    input_separator: String,

    /// Reason recorded with every reset
    #[arg(long)]
    reason: String,

    /// LastWorkflowTask, FirstWorkflowTask, LastContinuedAsNew or BadBinary
    #[arg(long)]
    reset_type: ResetType,

    /// Binary checksum to move away from, required for BadBinary
    #[arg(long)]
    reset_bad_binary_checksum: Option<String>,

    /// Events to re-apply after the reset point: All, Signal or None
    #[arg(long, default_value = "All")]
    reapply_type: ReapplyPolicy,

    /// Number of workflows processed concurrently
    #[arg(long, default_value_t = 1)]
    parallelism: usize,

    /// Resolve reset points and report them without resetting
    #[arg(long)]
    dry_run: bool,

    /// Skip workflows whose current run is still open
    #[arg(long)]
    skip_current_open: bool,

    /// Skip workflows whose given run is no longer the current run
    #[arg(long)]
    skip_base_is_not_current: bool,

    /// Only reset workflows whose last workflow task failed as non-deterministic
    #[arg(long)]
    non_deterministic: bool,

    /// Attempts per workflow before giving up
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    /// Upper bound of the random pause between attempts, in milliseconds
    #[arg(long, default_value_t = 2000)]
    retry_jitter_ms: u64,

    /// Upper bound of the random pause after each workflow, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pacing_ms: u64,

    /// Write a JSON report of every outcome to this file
    #[arg(long)]
    report_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ResetArgs {
    /// Workflow id
    #[arg(long, short = 'w')]
    workflow_id: String,

    /// Run id, the current run if omitted
    #[arg(long, short = 'r')]
    run_id: Option<String>,

    /// Reason recorded with the reset
    #[arg(long)]
    reason: String,

    /// Event to reset to; must be a completed or failed workflow task
    #[arg(long, conflicts_with = "reset_type", required_unless_present = "reset_type")]
    event_id: Option<i64>,

    /// Strategy that picks the event instead of --event-id
    #[arg(long)]
    reset_type: Option<ResetType>,

    /// Binary checksum to move away from, required for BadBinary
    #[arg(long)]
    reset_bad_binary_checksum: Option<String>,

    /// Events to re-apply after the reset point: All, Signal or None
    #[arg(long, default_value = "All")]
    reapply_type: ReapplyPolicy,
}

impl ResetBatchArgs {
    fn batch_config(&self, namespace: &str) -> Result<BatchResetConfig, ResetError> {
        if self.max_attempts == 0 {
            return Err(ResetError::Config("max attempts must be at least 1".to_string()));
        }
        let strategy =
            ResetStrategy::from_parts(self.reset_type, self.reset_bad_binary_checksum.as_deref())?;
        let config = BatchResetConfig::new(self.reason.clone(), strategy)
            .with_namespace(namespace)
            .with_parallelism(self.parallelism)
            .with_dry_run(self.dry_run)
            .with_skip_if_open(self.skip_current_open)
            .with_skip_if_base_not_current(self.skip_base_is_not_current)
            .with_non_deterministic_only(self.non_deterministic)
            .with_reapply_policy(self.reapply_type);
        config.validate()?;
        Ok(config)
    }

    fn runtime_config(&self, context_timeout: u64) -> RuntimeConfig {
        RuntimeConfig::default()
            .with_retry(
                RetryConfig::default()
                    .with_max_attempts(self.max_attempts)
                    .with_max_jitter(Duration::from_millis(self.retry_jitter_ms)),
            )
            .with_deadline(DeadlineConfig::from_secs(context_timeout))
            .with_pacing(Duration::from_millis(self.pacing_ms))
    }

    fn target_input(&self) -> Result<TargetInput, ResetError> {
        TargetInput::from_options(
            self.input_file.clone(),
            self.query.clone(),
            Some(self.input_separator.clone()),
        )
    }
}

impl ResetArgs {
    fn batch_config(&self, namespace: &str) -> Result<BatchResetConfig, ResetError> {
        if let Some(event_id) = self.event_id {
            if event_id < 1 {
                return Err(ResetError::Config(format!(
                    "event id must be a positive number, got {event_id}"
                )));
            }
        }
        // With --event-id the strategy is never consulted.
        let strategy = match self.reset_type {
            Some(reset_type) => {
                ResetStrategy::from_parts(reset_type, self.reset_bad_binary_checksum.as_deref())?
            }
            None => ResetStrategy::LastWorkflowTask,
        };
        let config = BatchResetConfig::new(self.reason.clone(), strategy)
            .with_namespace(namespace)
            .with_reapply_policy(self.reapply_type);
        config.validate()?;
        Ok(config)
    }
}

/// Entry point for the CLI.
pub async fn run() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init_tracing(cli.log_format, cli.verbose)?;
    execute(cli).await
}

/// Runs a parsed command. The exit code is a failure when any target failed.
pub async fn execute(cli: Cli) -> anyhow::Result<ExitCode> {
    match &cli.action {
        Action::ResetBatch(args) => reset_batch(&cli, args).await,
        Action::Reset(args) => reset(&cli, args).await,
    }
}

async fn connect(cli: &Cli, deadline: DeadlineConfig) -> anyhow::Result<Arc<CliService>> {
    let Some(path) = &cli.fixture else {
        return Err(ResetError::Config(
            "no workflow service configured: pass --fixture or set WFRESET_FIXTURE".to_string(),
        )
        .into());
    };
    let service = InMemoryService::load(path)
        .await
        .with_context(|| format!("loading service fixture {}", path.display()))?;
    Ok(Arc::new(DeadlineService::new(service, deadline)))
}

async fn reset_batch(cli: &Cli, args: &ResetBatchArgs) -> anyhow::Result<ExitCode> {
    // Every configuration error surfaces before the first service call.
    let config = args.batch_config(&cli.namespace)?;
    let input = args.target_input()?;
    let runtime = args.runtime_config(cli.context_timeout);
    let exclusions = match &args.exclude_file {
        Some(path) => load_exclusions(path, &args.input_separator).await?,
        None => ExclusionSet::new(),
    };

    let service = connect(cli, runtime.deadline).await?;
    let orchestrator = BatchOrchestrator::new(Arc::clone(&service), config, runtime)?;
    let source = TargetSource::open(&input, service, &cli.namespace, Arc::new(exclusions)).await?;

    let report = orchestrator.run(source).await?;
    if let Some(path) = &args.report_file {
        report.persist(path).await?;
    }

    eprintln!("{}", report.summary);
    Ok(if report.has_failures() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

async fn reset(cli: &Cli, args: &ResetArgs) -> anyhow::Result<ExitCode> {
    let config = args.batch_config(&cli.namespace)?;
    let runtime = RuntimeConfig::default()
        .with_deadline(DeadlineConfig::from_secs(cli.context_timeout))
        .with_pacing(Duration::ZERO);

    let service = connect(cli, runtime.deadline).await?;
    let orchestrator = BatchOrchestrator::new(service, config, runtime)?;
    let target = WorkflowRef::new(args.workflow_id.clone(), args.run_id.clone());

    let outcome = orchestrator.reset_one(&target, args.event_id).await;
    Ok(if outcome.is_failure() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
