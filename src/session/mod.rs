//! The query session and its consumer-facing API.
//!
//! `QueryShell` owns exactly one session. Each submission gets a new
//! [`SessionVersion`] and a lifecycle task that runs submission, polling and
//! the first page load. Every continuation checks its version against the
//! session before touching it, so responses for a superseded query are dropped
//! instead of applied.
//!
//! Renderers read [`SessionSnapshot`]s and can wait for changes on the
//! receiver returned by [`QueryShell::subscribe`].

mod state;

pub use state::{
    Abandoned, FetchOutcome, SessionSnapshot, SessionState, SessionStatus, SessionVersion,
};

use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{DatabaseContext, QueryBackend, QueryId, RemoteStatus, ResultsRequest};
use crate::config::ShellConfig;
use crate::error::{Result, ShellError};
use crate::query::poller::REMOTE_CANCEL_MESSAGE;
use crate::query::{fetch_page, PollOutcome, QuerySubmitter, ResultPoller, StatusEvent, StatusSink};

/// State shared between the shell and its lifecycle tasks.
struct Shared {
    backend: Arc<dyn QueryBackend>,
    config: ShellConfig,
    state: Mutex<SessionState>,
    database: Mutex<DatabaseContext>,
    changes: watch::Sender<u64>,
}

impl Shared {
    /// Runs `f` against the session and notifies subscribers if it changed anything.
    fn update<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let before = state.revision();
        let result = f(&mut state);
        let after = state.revision();
        drop(state);

        if after != before {
            self.changes.send_replace(after);
        }
        result
    }

    fn read<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&state)
    }

    fn database_context(&self) -> DatabaseContext {
        self.database
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Asks the backend to stop `query_id` without waiting for the answer.
    fn cancel_remote(&self, query_id: QueryId) {
        if !self.backend.supports_cancel() {
            debug!(%query_id, "backend has no cancel endpoint, abandoning query");
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(%query_id, "no runtime available for remote cancel");
            return;
        };

        let backend = Arc::clone(&self.backend);
        runtime.spawn(async move {
            match backend.cancel_query(&query_id).await {
                Ok(_) => info!(%query_id, "remote query cancelled"),
                Err(e) => warn!(%query_id, "remote cancel failed: {}", e),
            }
        });
    }

    /// Lifecycle of one submission: submit, poll, load the first page.
    async fn run(self: Arc<Self>, version: SessionVersion, sql: String, cancel: CancellationToken) {
        if cancel.is_cancelled() {
            debug!(%version, "superseded before submission");
            return;
        }

        let context = self.database_context();
        let submitted = QuerySubmitter::new(self.backend.as_ref())
            .submit(&sql, &context)
            .await;

        let response = match submitted {
            Ok(response) => response,
            Err(e) => {
                if !self.update(|s| s.fail(version, &e)) {
                    debug!(%version, "dropping stale submission failure");
                }
                return;
            }
        };

        let query_id = response.query_id.clone();
        if !self.update(|s| s.accept(version, query_id.clone())) {
            // Superseded while submitting; nobody will ever poll this query.
            self.cancel_remote(query_id);
            return;
        }

        let outcome = match response.status {
            Some(RemoteStatus::Succeeded) => {
                debug!(%query_id, "query settled on submission");
                PollOutcome::Succeeded
            }
            Some(status @ (RemoteStatus::Errored | RemoteStatus::Cancelled)) => {
                let message = response.error_message.unwrap_or_else(|| {
                    if status == RemoteStatus::Cancelled {
                        REMOTE_CANCEL_MESSAGE.to_string()
                    } else {
                        "query failed".to_string()
                    }
                });
                info!(%query_id, "query errored on submission: {}", message);
                self.apply(version, StatusEvent::Errored(message));
                return;
            }
            _ => {
                let poller = ResultPoller::new(
                    self.backend.as_ref(),
                    self.config.poll_interval(),
                    self.config.retry_policy(),
                );
                poller.poll(&query_id, version, &*self, &cancel).await
            }
        };

        if outcome != PollOutcome::Succeeded {
            return;
        }
        self.load_first_page(version, &cancel).await;
    }

    async fn load_first_page(&self, version: SessionVersion, cancel: &CancellationToken) {
        let page_size = self.config.page_size;
        let Some(request) = self.update(|s| s.begin_first_page(version, page_size)) else {
            return;
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(%version, "first page abandoned");
                return;
            }
            result = fetch_page(self.backend.as_ref(), &request) => result,
        };

        match result {
            Ok(page) => {
                let rows = page.len();
                if self.update(|s| s.complete_first_page(version, page)) {
                    info!(query_id = %request.query_id, rows, "first page loaded");
                }
            }
            Err(e) => {
                warn!(query_id = %request.query_id, "first page failed: {}", e);
                self.update(|s| s.fail(version, &e));
            }
        }
    }

    /// Fetches the page claimed by `begin_fetch_more` and settles the slot.
    async fn fetch_more(
        self: Arc<Self>,
        version: SessionVersion,
        request: ResultsRequest,
        cancel: CancellationToken,
    ) -> FetchOutcome {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return FetchOutcome::Superseded,
            result = fetch_page(self.backend.as_ref(), &request) => result,
        };
        if let Err(e) = &result {
            warn!(query_id = %request.query_id, "fetch more failed: {}", e);
        }
        self.update(|s| s.finish_fetch_more(version, result))
    }
}

impl StatusSink for Shared {
    fn is_current(&self, version: SessionVersion) -> bool {
        self.read(|s| s.is_current(version))
    }

    fn apply(&self, version: SessionVersion, event: StatusEvent) -> bool {
        self.update(|s| s.apply_event(version, event))
    }
}

/// Handle to the lifecycle task of one submission.
#[derive(Debug)]
pub struct QueryHandle {
    version: SessionVersion,
    task: JoinHandle<()>,
}

impl QueryHandle {
    /// Session version this submission runs under.
    pub fn version(&self) -> SessionVersion {
        self.version
    }

    /// Returns true once the lifecycle task has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the lifecycle task to finish.
    ///
    /// A superseded or cancelled submission finishes as soon as it notices.
    pub async fn wait(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| ShellError::internal(format!("query task failed: {e}")))
    }
}

/// Asynchronous query engine with a single active session.
///
/// Cloning is cheap; all clones drive the same session.
#[derive(Clone)]
pub struct QueryShell {
    shared: Arc<Shared>,
}

impl QueryShell {
    /// Creates a shell over `backend`.
    pub fn new(backend: Arc<dyn QueryBackend>, config: ShellConfig) -> Result<Self> {
        config.validate()?;
        let database = config.database_context();
        let (changes, _) = watch::channel(0);

        Ok(Self {
            shared: Arc::new(Shared {
                backend,
                config,
                state: Mutex::new(SessionState::new()),
                database: Mutex::new(database),
                changes,
            }),
        })
    }

    /// Submits `sql`, superseding any live query.
    ///
    /// Returns immediately; progress is observed through [`snapshot`](Self::snapshot).
    /// Must be called from within a tokio runtime.
    pub fn submit_query(&self, sql: &str) -> QueryHandle {
        let ((version, superseded), cancel) = self.shared.update(|s| {
            let begun = s.begin(sql);
            (begun, s.cancel_token())
        });

        if let Some(query_id) = superseded.and_then(|a| a.query_id) {
            self.shared.cancel_remote(query_id);
        }

        info!(%version, "starting query");
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(shared.run(version, sql.to_string(), cancel));
        QueryHandle { version, task }
    }

    /// Submits `sql` and waits until its lifecycle settles.
    pub async fn execute(&self, sql: &str) -> Result<SessionSnapshot> {
        self.submit_query(sql).wait().await?;
        Ok(self.snapshot())
    }

    /// Cancels the current submission.
    ///
    /// A live query is also cancelled remotely when the backend supports it,
    /// and an in-flight page fetch is abandoned. Returns false if nothing was
    /// ever submitted.
    pub fn cancel_query(&self) -> bool {
        let Some(abandoned) = self.shared.update(SessionState::cancel) else {
            return false;
        };
        if abandoned.was_live {
            if let Some(query_id) = abandoned.query_id {
                self.shared.cancel_remote(query_id);
            }
        }
        true
    }

    /// Fetches the next page of a succeeded query.
    ///
    /// Returns [`FetchOutcome::Skipped`] without a request when there are no
    /// results, every page has arrived, or a fetch is already in flight.
    /// The fetch runs in its own task, so dropping the returned future does
    /// not leave the fetch slot claimed.
    pub async fn fetch_more_results(&self) -> FetchOutcome {
        let claimed = self.shared.update(|s| {
            let claim = s.begin_fetch_more()?;
            Some((claim, s.cancel_token()))
        });
        let Some(((version, request), cancel)) = claimed else {
            debug!("fetch more skipped");
            return FetchOutcome::Skipped;
        };

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(shared.fetch_more(version, request, cancel));
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                let error = ShellError::internal(format!("fetch task failed: {e}"));
                self.shared.update(|s| s.finish_fetch_more(version, Err(error)))
            }
        }
    }

    /// Current view of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.read(SessionState::snapshot)
    }

    /// Current session version.
    pub fn version(&self) -> SessionVersion {
        self.shared.read(SessionState::version)
    }

    /// Current lifecycle state.
    pub fn status(&self) -> SessionStatus {
        self.shared.read(SessionState::status)
    }

    /// Receiver of a revision counter bumped on every observable change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.changes.subscribe()
    }

    /// Switches the database used by subsequent submissions.
    ///
    /// A query already submitted keeps the context it was submitted with.
    pub fn select_database(&self, database: Option<&str>) {
        let mut context = self
            .shared
            .database
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        context.database = database.map(str::to_string);
        info!(database = database.unwrap_or("<default>"), "database selected");
    }

    /// Database context used for the next submission.
    pub fn database(&self) -> DatabaseContext {
        self.shared.database_context()
    }

    /// Engine configuration.
    pub fn config(&self) -> &ShellConfig {
        &self.shared.config
    }
}
