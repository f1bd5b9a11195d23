//! In-process workflow service.
//!
//! [`InMemoryService`] implements [`WorkflowService`] over a fixture of runs,
//! histories and visibility results. It pages responses like the real
//! service, records every reset it receives and can be scripted to fail, which
//! makes it the test double for the engine and the backend of offline
//! rehearsals (`wfreset --fixture`).
//!
//! # Fixture format
//!
//! ```json
//! {
//!   "runs": [
//!     {
//!       "workflow_id": "wf-1",
//!       "run_id": "run-A",
//!       "is_open": false,
//!       "history": [
//!         {"event_id": 1, "event_type": "WorkflowExecutionStarted"},
//!         {"event_id": 2, "event_type": "WorkflowTaskScheduled"}
//!       ]
//!     }
//!   ],
//!   "visibility": {"WorkflowType='payments'": [{"workflow_id": "wf-1"}]}
//! }
//! ```
//!
//! The last run listed for a workflow id is its current run unless
//! `current_runs` says otherwise.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ResetError, Result, ServiceError};
use crate::service::{
    DescribeRequest, HistoryPage, HistoryPageRequest, ResetRequest, ResetResponse, ScanPage,
    ScanRequest, WorkflowService,
};
use crate::types::{
    AutoResetPoint, EventType, ExecutionDescription, HistoryEventView, WorkflowRef,
};

/// One run of a workflow in a fixture.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunFixture {
    pub workflow_id: String,
    pub run_id: String,
    #[serde(default)]
    pub is_open: bool,
    #[serde(default)]
    pub auto_reset_points: Vec<AutoResetPoint>,
    #[serde(default)]
    pub history: Vec<HistoryEventView>,
}

impl RunFixture {
    /// Creates a closed run with an empty history.
    pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
            is_open: false,
            auto_reset_points: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn open(mut self) -> Self {
        self.is_open = true;
        self
    }

    pub fn with_history(mut self, history: Vec<HistoryEventView>) -> Self {
        self.history = history;
        self
    }

    pub fn with_reset_points(mut self, points: Vec<AutoResetPoint>) -> Self {
        self.auto_reset_points = points;
        self
    }
}

/// Serialized form of an [`InMemoryService`].
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceFixture {
    #[serde(default)]
    pub runs: Vec<RunFixture>,
    /// Overrides the "last listed run is current" rule
    #[serde(default)]
    pub current_runs: HashMap<String, String>,
    /// Visibility results keyed by exact query string
    #[serde(default)]
    pub visibility: HashMap<String, Vec<WorkflowRef>>,
}

/// RPC methods of [`WorkflowService`], used to script failures and count calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    Describe,
    GetHistory,
    Scan,
    Reset,
}

#[derive(Debug, Default)]
struct State {
    runs: HashMap<(String, String), RunFixture>,
    current: HashMap<String, String>,
    visibility: HashMap<String, Vec<WorkflowRef>>,
    failures: HashMap<(RpcMethod, String), VecDeque<ServiceError>>,
    reset_calls: Vec<ResetRequest>,
    calls: HashMap<RpcMethod, usize>,
}

impl State {
    fn insert_run(&mut self, run: RunFixture) {
        self.current
            .insert(run.workflow_id.clone(), run.run_id.clone());
        self.runs
            .insert((run.workflow_id.clone(), run.run_id.clone()), run);
    }

    /// Counts the call and pops a scripted failure for `key`, if any.
    fn enter(&mut self, method: RpcMethod, key: &str) -> std::result::Result<(), ServiceError> {
        *self.calls.entry(method).or_insert(0) += 1;
        match self
            .failures
            .get_mut(&(method, key.to_string()))
            .and_then(VecDeque::pop_front)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn resolve_run(&self, workflow_id: &str, run_id: Option<&str>) -> std::result::Result<&RunFixture, ServiceError> {
        let run_id = match run_id.filter(|r| !r.is_empty()) {
            Some(run_id) => run_id.to_string(),
            None => self
                .current
                .get(workflow_id)
                .cloned()
                .ok_or_else(|| ServiceError::not_found(format!("workflow {workflow_id} not found")))?,
        };
        self.runs
            .get(&(workflow_id.to_string(), run_id.clone()))
            .ok_or_else(|| ServiceError::not_found(format!("run {workflow_id}/{run_id} not found")))
    }
}

/// Fixture-backed [`WorkflowService`].
#[derive(Debug)]
pub struct InMemoryService {
    state: Mutex<State>,
    /// Server-side cap applied to every requested page size
    max_page_size: usize,
    latency: Option<Duration>,
}

impl Default for InMemoryService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryService {
    /// Creates an empty service.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            max_page_size: usize::MAX,
            latency: None,
        }
    }

    /// Creates a service from a fixture.
    pub fn from_fixture(fixture: ServiceFixture) -> Self {
        let mut service = Self::new();
        {
            let state = service.state_mut();
            for run in fixture.runs {
                state.insert_run(run);
            }
            state.current.extend(fixture.current_runs);
            state.visibility = fixture.visibility;
        }
        service
    }

    /// Loads a JSON fixture from disk.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ResetError::InputFile {
                path: path.to_path_buf(),
                source,
            })?;
        let fixture: ServiceFixture = serde_json::from_str(&json)?;
        tracing::debug!(runs = fixture.runs.len(), "Loaded service fixture from {}", path.display());
        Ok(Self::from_fixture(fixture))
    }

    /// Adds a run and makes it the current run of its workflow id.
    pub fn with_run(mut self, run: RunFixture) -> Self {
        self.state_mut().insert_run(run);
        self
    }

    pub fn with_current_run(mut self, workflow_id: &str, run_id: &str) -> Self {
        self.state_mut()
            .current
            .insert(workflow_id.to_string(), run_id.to_string());
        self
    }

    pub fn with_visibility(mut self, query: &str, executions: Vec<WorkflowRef>) -> Self {
        self.state_mut()
            .visibility
            .insert(query.to_string(), executions);
        self
    }

    /// Caps every page at `max_page_size` entries regardless of the request.
    pub fn with_page_size(mut self, max_page_size: usize) -> Self {
        self.max_page_size = max_page_size.max(1);
        self
    }

    /// Delays every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes the next call of `method` for `key` fail with `error`.
    ///
    /// `key` is the workflow id, or the query string for [`RpcMethod::Scan`].
    /// Repeated calls queue several failures.
    pub fn fail_next(&self, method: RpcMethod, key: &str, error: ServiceError) {
        self.lock()
            .failures
            .entry((method, key.to_string()))
            .or_default()
            .push_back(error);
    }

    /// Resets received so far, in arrival order.
    pub fn reset_calls(&self) -> Vec<ResetRequest> {
        self.lock().reset_calls.clone()
    }

    pub fn call_count(&self, method: RpcMethod) -> usize {
        self.lock().calls.get(&method).copied().unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_mut(&mut self) -> &mut State {
        self.state.get_mut().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn page_limit(&self, requested: usize) -> usize {
        requested.clamp(1, self.max_page_size)
    }
}

fn decode_token(token: &Option<Vec<u8>>) -> std::result::Result<usize, ServiceError> {
    match token {
        Some(bytes) if !bytes.is_empty() => std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| ServiceError::invalid_argument("invalid next page token")),
        _ => Ok(0),
    }
}

/// Slices `items[offset..]` into a page and the token for the next one.
fn paginate<T: Clone>(items: &[T], offset: usize, limit: usize) -> (Vec<T>, Option<Vec<u8>>) {
    let start = offset.min(items.len());
    let end = start.saturating_add(limit).min(items.len());
    let next = (end < items.len()).then(|| end.to_string().into_bytes());
    (items[start..end].to_vec(), next)
}

#[async_trait::async_trait]
impl WorkflowService for InMemoryService {
    async fn describe_execution(
        &self,
        request: DescribeRequest,
    ) -> std::result::Result<ExecutionDescription, ServiceError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.enter(RpcMethod::Describe, &request.workflow_id)?;

        let current_run_id = state
            .current
            .get(&request.workflow_id)
            .cloned()
            .ok_or_else(|| {
                ServiceError::not_found(format!("workflow {} not found", request.workflow_id))
            })?;
        let run = state.resolve_run(&request.workflow_id, request.run_id.as_deref())?;
        Ok(ExecutionDescription {
            current_run_id,
            is_open: run.is_open,
            auto_reset_points: run.auto_reset_points.clone(),
        })
    }

    async fn get_history_page(
        &self,
        request: HistoryPageRequest,
    ) -> std::result::Result<HistoryPage, ServiceError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.enter(RpcMethod::GetHistory, &request.workflow_id)?;

        let offset = decode_token(&request.next_page_token)?;
        let run = state.resolve_run(&request.workflow_id, Some(&request.run_id))?;
        let (events, next_page_token) =
            paginate(&run.history, offset, self.page_limit(request.page_size));
        Ok(HistoryPage {
            events,
            next_page_token,
        })
    }

    async fn scan_executions(
        &self,
        request: ScanRequest,
    ) -> std::result::Result<ScanPage, ServiceError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.enter(RpcMethod::Scan, &request.query)?;

        let offset = decode_token(&request.next_page_token)?;
        let matches = state
            .visibility
            .get(&request.query)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let (executions, next_page_token) =
            paginate(matches, offset, self.page_limit(request.page_size));
        Ok(ScanPage {
            executions,
            next_page_token,
        })
    }

    async fn reset_execution(
        &self,
        request: ResetRequest,
    ) -> std::result::Result<ResetResponse, ServiceError> {
        self.simulate_latency().await;
        let mut state = self.lock();
        state.enter(RpcMethod::Reset, &request.workflow_id)?;

        let base = state.resolve_run(&request.workflow_id, Some(&request.run_id))?;
        let Some(position) = base
            .history
            .iter()
            .position(|e| e.event_id == request.event_id)
        else {
            return Err(ServiceError::invalid_argument(format!(
                "event {} does not exist in {}/{}",
                request.event_id, request.workflow_id, request.run_id
            )));
        };

        // The new run replays the base history up to the anchor and stays open.
        let mut history = base.history[..=position].to_vec();
        let next_id = request.event_id + 1;
        history.push(HistoryEventView::task_failed(
            next_id,
            crate::types::TaskFailedCause::ResetWorkflow,
            Some(&request.reason),
        ));
        history.push(HistoryEventView::new(next_id + 1, EventType::WorkflowTaskScheduled));

        let new_run_id = Uuid::new_v4().to_string();
        let new_run = RunFixture {
            workflow_id: request.workflow_id.clone(),
            run_id: new_run_id.clone(),
            is_open: true,
            auto_reset_points: Vec::new(),
            history,
        };
        state.insert_run(new_run);
        state.reset_calls.push(request);

        Ok(ResetResponse { new_run_id })
    }
}
