//! Mock query service for testing.
//!
//! Provides a scripted, in-memory backend: each submission consumes the next
//! [`MockQuery`] script, which decides the status sequence, the result pages
//! and any injected failures. Gates can hold responses in flight so tests can
//! interleave submissions, polls and fetches deterministically.

use super::{
    QueryBackend, QueryId, RemoteStatus, ResultPage, ResultsRequest, StatusResponse,
    SubmitRequest, SubmitResponse,
};
use crate::backend::RawRow;
use crate::error::{Result, ShellError};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Script for one submitted query.
#[derive(Debug, Clone, Default)]
pub struct MockQuery {
    settled: Option<(RemoteStatus, Option<String>)>,
    statuses: VecDeque<Result<StatusResponse>>,
    pages: Vec<ResultPage>,
    fetch_errors: VecDeque<ShellError>,
    status_latency: Duration,
    status_gate: Option<Arc<Semaphore>>,
    results_gate: Option<Arc<Semaphore>>,
}

impl MockQuery {
    /// Creates an empty script: the query stays provisioning and has no rows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script that goes provisioning, running, succeeded and serves `pages`.
    pub fn succeeding(pages: Vec<Vec<RawRow>>) -> Self {
        let mut query = Self::new().statuses([
            RemoteStatus::Provisioning,
            RemoteStatus::Running,
            RemoteStatus::Succeeded,
        ]);
        for rows in pages {
            query = query.page(rows);
        }
        query
    }

    /// Appends statuses returned by successive status checks.
    pub fn statuses(mut self, statuses: impl IntoIterator<Item = RemoteStatus>) -> Self {
        self.statuses
            .extend(statuses.into_iter().map(|s| Ok(StatusResponse::of(s))));
        self
    }

    /// Appends a failed terminal status with the backend's message.
    pub fn errored(mut self, message: impl Into<String>) -> Self {
        self.statuses
            .push_back(Ok(StatusResponse::errored(message)));
        self
    }

    /// Appends a status check that fails with `error`.
    pub fn status_error(mut self, error: ShellError) -> Self {
        self.statuses.push_back(Err(error));
        self
    }

    /// Makes the submission response report `status` right away.
    pub fn settle_on_submit(mut self, status: RemoteStatus, message: Option<&str>) -> Self {
        self.settled = Some((status, message.map(str::to_string)));
        self
    }

    /// Appends a result page. Every page but the last gets a cursor.
    pub fn page(mut self, rows: Vec<RawRow>) -> Self {
        let index = self.pages.len();
        if let Some(previous) = self.pages.last_mut() {
            previous.next_cursor = Some(cursor_for(index));
        }
        self.pages.push(ResultPage::new(rows, None));
        self
    }

    /// Makes the next results request fail with `error`.
    pub fn fetch_error(mut self, error: ShellError) -> Self {
        self.fetch_errors.push_back(error);
        self
    }

    /// Delays every status response by `latency`.
    pub fn status_latency(mut self, latency: Duration) -> Self {
        self.status_latency = latency;
        self
    }

    /// Holds every status response until the gate is released.
    pub fn status_gate(mut self, gate: &MockGate) -> Self {
        self.status_gate = Some(gate.0.clone());
        self
    }

    /// Holds every results response until the gate is released.
    pub fn results_gate(mut self, gate: &MockGate) -> Self {
        self.results_gate = Some(gate.0.clone());
        self
    }
}

fn cursor_for(index: usize) -> String {
    format!("page-{index}")
}

/// Releases held mock responses one at a time.
#[derive(Debug, Clone)]
pub struct MockGate(Arc<Semaphore>);

impl MockGate {
    /// Creates a closed gate.
    pub fn new() -> Self {
        Self(Arc::new(Semaphore::new(0)))
    }

    /// Lets one held response through.
    pub fn release(&self) {
        self.0.add_permits(1);
    }

    /// Lets every current and future response through.
    pub fn open(&self) {
        self.0.add_permits(Semaphore::MAX_PERMITS / 2);
    }
}

impl Default for MockGate {
    fn default() -> Self {
        Self::new()
    }
}

async fn pass(gate: Option<Arc<Semaphore>>) {
    if let Some(gate) = gate {
        if let Ok(permit) = gate.acquire().await {
            permit.forget();
        }
    }
}

#[derive(Debug)]
struct QueryState {
    script: MockQuery,
    last_status: StatusResponse,
}

#[derive(Debug, Default)]
struct Inner {
    scripts: VecDeque<Result<MockQuery>>,
    queries: HashMap<QueryId, QueryState>,
    submitted_sql: Vec<SubmitRequest>,
    results_requests: Vec<ResultsRequest>,
    cancelled: Vec<QueryId>,
}

/// A mock query service that replays scripted responses.
#[derive(Debug, Default)]
pub struct MockBackend {
    inner: Mutex<Inner>,
    next_id: AtomicUsize,
    status_calls: AtomicUsize,
    cancel_endpoint: Option<std::result::Result<(), String>>,
    submit_gate: Option<Arc<Semaphore>>,
}

impl MockBackend {
    /// Creates a backend with no scripted queries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the script used by the next submission.
    pub fn with_query(self, query: MockQuery) -> Self {
        self.lock().scripts.push_back(Ok(query));
        self
    }

    /// Makes the next submission fail with `error`.
    pub fn with_submit_error(self, error: ShellError) -> Self {
        self.lock().scripts.push_back(Err(error));
        self
    }

    /// Exposes a cancel endpoint that succeeds.
    pub fn with_cancel_endpoint(mut self) -> Self {
        self.cancel_endpoint = Some(Ok(()));
        self
    }

    /// Exposes a cancel endpoint that always fails.
    pub fn with_failing_cancel_endpoint(mut self, message: impl Into<String>) -> Self {
        self.cancel_endpoint = Some(Err(message.into()));
        self
    }

    /// Holds every submission response until the gate is released.
    pub fn with_submit_gate(mut self, gate: &MockGate) -> Self {
        self.submit_gate = Some(gate.0.clone());
        self
    }

    /// Queues a script after construction, e.g. while a session is running.
    pub fn push_query(&self, query: MockQuery) {
        self.lock().scripts.push_back(Ok(query));
    }

    /// Makes the next results request for `query_id` fail with `error`.
    pub fn inject_fetch_error(&self, query_id: &QueryId, error: ShellError) {
        if let Some(state) = self.lock().queries.get_mut(query_id) {
            state.script.fetch_errors.push_back(error);
        }
    }

    /// Requests received by the submission RPC, in order.
    pub fn submissions(&self) -> Vec<SubmitRequest> {
        self.lock().submitted_sql.clone()
    }

    /// Requests received by the results RPC, in order.
    pub fn results_requests(&self) -> Vec<ResultsRequest> {
        self.lock().results_requests.clone()
    }

    /// Queries the cancel endpoint was called for.
    pub fn cancelled(&self) -> Vec<QueryId> {
        self.lock().cancelled.clone()
    }

    /// Number of status checks received.
    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl QueryBackend for MockBackend {
    async fn submit_query(&self, request: &SubmitRequest) -> Result<SubmitResponse> {
        let response = {
            let mut inner = self.lock();
            inner.submitted_sql.push(request.clone());

            match inner.scripts.pop_front().unwrap_or_else(|| Ok(MockQuery::new())) {
                Err(e) => Err(e),
                Ok(script) => {
                    let query_id = QueryId::new(format!(
                        "query-{}",
                        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
                    ));
                    let (status, error_message) = match &script.settled {
                        Some((status, message)) => (Some(*status), message.clone()),
                        None => (None, None),
                    };
                    inner.queries.insert(
                        query_id.clone(),
                        QueryState {
                            script,
                            last_status: StatusResponse::of(RemoteStatus::Provisioning),
                        },
                    );
                    Ok(SubmitResponse {
                        query_id,
                        status,
                        error_message,
                    })
                }
            }
        };

        pass(self.submit_gate.clone()).await;
        response
    }

    async fn query_status(&self, query_id: &QueryId) -> Result<StatusResponse> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);

        let (response, latency, gate) = {
            let mut inner = self.lock();
            let state = inner
                .queries
                .get_mut(query_id)
                .ok_or_else(|| ShellError::rejected(format!("unknown query {query_id}")))?;

            let response = match state.script.statuses.pop_front() {
                Some(Ok(status)) => {
                    state.last_status = status.clone();
                    Ok(status)
                }
                Some(Err(e)) => Err(e),
                None => Ok(state.last_status.clone()),
            };
            (
                response,
                state.script.status_latency,
                state.script.status_gate.clone(),
            )
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        pass(gate).await;
        response
    }

    async fn query_results(&self, request: &ResultsRequest) -> Result<ResultPage> {
        let (response, gate) = {
            let mut inner = self.lock();
            inner.results_requests.push(request.clone());
            let state = inner
                .queries
                .get_mut(&request.query_id)
                .ok_or_else(|| ShellError::rejected(format!("unknown query {}", request.query_id)))?;

            let response = match state.script.fetch_errors.pop_front() {
                Some(e) => Err(e),
                None => {
                    let index = match &request.cursor {
                        None => Some(0),
                        Some(cursor) => (0..state.script.pages.len())
                            .find(|i| cursor_for(*i) == *cursor),
                    };
                    match index {
                        Some(i) => Ok(state.script.pages.get(i).cloned().unwrap_or_default()),
                        None => Err(ShellError::rejected(format!(
                            "invalid pagination token {:?}",
                            request.cursor
                        ))),
                    }
                }
            };
            (response, state.script.results_gate.clone())
        };

        pass(gate).await;
        response
    }

    async fn cancel_query(&self, query_id: &QueryId) -> Result<bool> {
        match &self.cancel_endpoint {
            None => Ok(false),
            Some(outcome) => {
                self.lock().cancelled.push(query_id.clone());
                outcome
                    .clone()
                    .map(|_| true)
                    .map_err(ShellError::transport)
            }
        }
    }

    fn supports_cancel(&self) -> bool {
        self.cancel_endpoint.is_some()
    }
}
