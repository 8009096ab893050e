//! Session state machine.
//!
//! Provides the pure state of the shell's single session, separated from the
//! async tasks that drive it. Every transition that originates from an
//! asynchronous response takes the session version the response belongs to
//! and is a no-op when that version is no longer current.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::{QueryId, ResultPage, ResultsRequest};
use crate::error::ShellError;
use crate::query::{Record, ResultAggregator, StatusEvent};

/// Monotonic counter identifying one submission of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionVersion(u64);

impl SessionVersion {
    /// Version of a session nothing was ever submitted to.
    pub fn initial() -> Self {
        Self(0)
    }

    /// The version after this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the inner u64 value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Lifecycle state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    /// Nothing submitted yet.
    #[default]
    Idle,
    /// Submitted; waiting for the backend to hand back a query id.
    Provisioning,
    /// Accepted by the backend; polling until it settles.
    Running,
    /// Finished; results are available.
    Succeeded,
    /// Failed; `error_message` says why.
    Errored,
    /// Cancelled by the user.
    Cancelled,
}

impl SessionStatus {
    /// Returns true while a query is being provisioned or run.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Provisioning | Self::Running)
    }

    /// Returns true for states with no further automatic transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Errored | Self::Cancelled)
    }

    /// Lower-case name used in status lines.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Errored => "errored",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a newer submission or a cancel left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Abandoned {
    /// Version that was invalidated.
    pub version: SessionVersion,
    /// Backend handle of the abandoned query, if submission had completed.
    pub query_id: Option<QueryId>,
    /// True if the abandoned query was still provisioning or running.
    pub was_live: bool,
}

/// Result of a `fetch_more_results` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Nothing was requested: no results yet, all pages fetched, or a fetch is
    /// already in flight.
    Skipped,
    /// A page was appended.
    Appended {
        /// Rows in the page.
        rows: usize,
        /// True if that was the last page.
        exhausted: bool,
    },
    /// The fetch failed; rows already fetched are kept.
    Failed(ShellError),
    /// The session moved on while the page was in flight; it was dropped.
    Superseded,
}

/// Read-only view of the session for rendering.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    /// Current session version.
    pub version: SessionVersion,
    /// Lifecycle state.
    pub status: SessionStatus,
    /// SQL of the current submission.
    pub sql: Option<String>,
    /// Backend handle, once submission succeeded.
    pub query_id: Option<QueryId>,
    /// Time spent running, zero until the backend accepts the query.
    pub elapsed: Duration,
    /// `elapsed` in whole seconds.
    pub elapsed_seconds: u64,
    /// Display columns.
    pub columns: Vec<String>,
    /// Rows fetched so far.
    pub rows: Vec<Record>,
    /// True while a page fetch is in flight.
    pub is_fetching_more: bool,
    /// True once every page has been fetched.
    pub exhausted: bool,
    /// Why the session errored.
    pub error_message: Option<String>,
    /// Last pagination failure, cleared by the next successful page.
    pub fetch_error: Option<String>,
}

impl SessionSnapshot {
    /// Number of rows fetched so far.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Mutable state of the session.
#[derive(Debug)]
pub struct SessionState {
    version: SessionVersion,
    status: SessionStatus,
    sql: Option<String>,
    query_id: Option<QueryId>,
    submitted_at: Option<Instant>,
    settled_at: Option<Instant>,
    error_message: Option<String>,
    results: Option<ResultAggregator>,
    cancel: CancellationToken,
    revision: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// Creates an idle session.
    pub fn new() -> Self {
        Self {
            version: SessionVersion::initial(),
            status: SessionStatus::Idle,
            sql: None,
            query_id: None,
            submitted_at: None,
            settled_at: None,
            error_message: None,
            results: None,
            cancel: CancellationToken::new(),
            revision: 0,
        }
    }

    /// Current session version.
    pub fn version(&self) -> SessionVersion {
        self.version
    }

    /// Current lifecycle state.
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Counter bumped by every observable change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Cancellation token of the current version.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Returns true if `version` is the current version.
    pub fn is_current(&self, version: SessionVersion) -> bool {
        self.version == version
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    /// Invalidates the current version and everything in flight for it.
    fn invalidate(&mut self) -> Abandoned {
        let abandoned = Abandoned {
            version: self.version,
            query_id: self.query_id.clone(),
            was_live: self.status.is_live(),
        };
        self.cancel.cancel();
        self.version = self.version.next();
        self.cancel = CancellationToken::new();
        abandoned
    }

    /// Starts a new submission, superseding whatever came before.
    ///
    /// Returns the new version and, if a query was still live, what was abandoned.
    pub fn begin(&mut self, sql: &str) -> (SessionVersion, Option<Abandoned>) {
        let previous = self.invalidate();
        let superseded = if previous.was_live {
            info!(version = %previous.version, "superseding live query");
            Some(previous)
        } else {
            None
        };

        self.status = SessionStatus::Provisioning;
        self.sql = Some(sql.to_string());
        self.query_id = None;
        self.submitted_at = None;
        self.settled_at = None;
        self.error_message = None;
        self.results = None;
        self.touch();

        (self.version, superseded)
    }

    /// Cancels the current submission.
    ///
    /// Any submitted session ends in `Cancelled` under a new version. A live
    /// lifecycle stops, an in-flight page fetch is abandoned and rows already
    /// fetched stay visible. An idle session has nothing to cancel and `None`
    /// is returned.
    pub fn cancel(&mut self) -> Option<Abandoned> {
        if self.status == SessionStatus::Idle {
            return None;
        }

        let abandoned = self.invalidate();
        if let Some(results) = self.results.as_mut() {
            results.abandon_fetch();
        }
        self.status = SessionStatus::Cancelled;
        self.error_message = None;
        if self.settled_at.is_none() {
            self.settled_at = Some(Instant::now());
        }
        self.touch();
        info!(version = %abandoned.version, was_live = abandoned.was_live, "query cancelled");
        Some(abandoned)
    }

    /// Records the job handle returned by submission.
    ///
    /// The session is `Running` from here on and the run clock starts.
    pub fn accept(&mut self, version: SessionVersion, query_id: QueryId) -> bool {
        if !self.is_current(version) || !self.status.is_live() {
            debug!(%version, "dropping stale submission response");
            return false;
        }
        self.query_id = Some(query_id);
        self.status = SessionStatus::Running;
        self.submitted_at = Some(Instant::now());
        self.touch();
        true
    }

    /// Applies a status event from the poller.
    pub fn apply_event(&mut self, version: SessionVersion, event: StatusEvent) -> bool {
        if !self.is_current(version) || !self.status.is_live() {
            return false;
        }
        match event {
            // Backend provisioning is internal; the session runs from acceptance.
            StatusEvent::Provisioning | StatusEvent::Running => {}
            // The session only reports success once the first page is in.
            StatusEvent::Succeeded => {}
            StatusEvent::Errored(message) => self.fail_with(message),
        }
        true
    }

    /// Ends the current version in `Errored`.
    pub fn fail(&mut self, version: SessionVersion, error: &ShellError) -> bool {
        if !self.is_current(version) || !self.status.is_live() {
            return false;
        }
        self.fail_with(error.message().to_string());
        true
    }

    fn fail_with(&mut self, message: String) {
        self.status = SessionStatus::Errored;
        self.error_message = Some(message);
        self.settled_at = Some(Instant::now());
        self.touch();
    }

    /// Creates the result aggregator and claims the first page fetch.
    pub fn begin_first_page(
        &mut self,
        version: SessionVersion,
        page_size: Option<u32>,
    ) -> Option<ResultsRequest> {
        if !self.is_current(version) || !self.status.is_live() {
            return None;
        }
        let query_id = self.query_id.clone()?;
        let results = self
            .results
            .get_or_insert_with(|| ResultAggregator::new(query_id, page_size));
        results.begin_fetch()
    }

    /// Applies the first page and settles the session in `Succeeded`.
    pub fn complete_first_page(&mut self, version: SessionVersion, page: ResultPage) -> bool {
        if !self.is_current(version) || !self.status.is_live() {
            debug!(%version, "dropping stale first page");
            return false;
        }
        let Some(results) = self.results.as_mut() else {
            return false;
        };
        results.apply_page(page);
        self.status = SessionStatus::Succeeded;
        self.settled_at = Some(Instant::now());
        self.touch();
        true
    }

    /// Claims the fetch slot for the next page of a succeeded query.
    pub fn begin_fetch_more(&mut self) -> Option<(SessionVersion, ResultsRequest)> {
        if self.status != SessionStatus::Succeeded {
            return None;
        }
        let request = self.results.as_mut()?.begin_fetch()?;
        self.touch();
        Some((self.version, request))
    }

    /// Settles a page fetch started by `begin_fetch_more`.
    pub fn finish_fetch_more(
        &mut self,
        version: SessionVersion,
        result: Result<ResultPage, ShellError>,
    ) -> FetchOutcome {
        if !self.is_current(version) {
            debug!(%version, "dropping stale page");
            return FetchOutcome::Superseded;
        }
        let Some(results) = self.results.as_mut() else {
            return FetchOutcome::Superseded;
        };
        let outcome = match result {
            Ok(page) => {
                let rows = results.apply_page(page);
                FetchOutcome::Appended {
                    rows,
                    exhausted: results.is_exhausted(),
                }
            }
            Err(e) => {
                results.fail_fetch(&e);
                FetchOutcome::Failed(e)
            }
        };
        self.touch();
        outcome
    }

    /// Time spent running as of `now`.
    ///
    /// Counts from acceptance of the submission and stops when the query settles.
    pub fn elapsed_at(&self, now: Instant) -> Duration {
        match self.submitted_at {
            None => Duration::ZERO,
            Some(started) => {
                let end = self.settled_at.unwrap_or(now);
                end.saturating_duration_since(started)
            }
        }
    }

    /// Builds the read-only view of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        let elapsed = self.elapsed_at(Instant::now());
        let (columns, rows, is_fetching_more, exhausted, fetch_error) = match &self.results {
            Some(results) => (
                results.columns().to_vec(),
                results.rows().to_vec(),
                results.is_fetching_more(),
                results.is_exhausted(),
                results.last_error().map(str::to_string),
            ),
            None => (Vec::new(), Vec::new(), false, false, None),
        };

        SessionSnapshot {
            version: self.version,
            status: self.status,
            sql: self.sql.clone(),
            query_id: self.query_id.clone(),
            elapsed,
            elapsed_seconds: elapsed.as_secs(),
            columns,
            rows,
            is_fetching_more,
            exhausted,
            error_message: self.error_message.clone(),
            fetch_error,
        }
    }
}
