//! Status polling for submitted queries.
//!
//! The poller checks a query's remote status at a fixed interval until it
//! settles. Every observed transition is handed to a [`StatusSink`] together
//! with the session version the poll loop was started for; the sink refuses
//! events for a version that is no longer current, and the loop ends quietly
//! the first time that happens.
//!
//! Transport failures are retried with exponential backoff:
//!
//! ```text
//! backoff = min(initial_backoff * multiplier^attempt, max_backoff)
//! ```
//!
//! A failed status reported by the backend is never retried.

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backend::{QueryBackend, QueryId, RemoteStatus};
use crate::error::ShellError;
use crate::session::SessionVersion;

/// Message used when the backend cancels a query without saying why.
pub const REMOTE_CANCEL_MESSAGE: &str = "query was cancelled by the backend";

/// Retry policy for transient status-check failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first failed attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound for any single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_millis(capped as u64)
        } else {
            self.max_backoff
        }
    }
}

/// A remote lifecycle transition observed by the poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// Accepted, not yet executing.
    Provisioning,
    /// Executing.
    Running,
    /// Finished; results can be fetched.
    Succeeded,
    /// Finished with an error, or polling gave up.
    Errored(String),
}

/// Receives status events on behalf of one session.
pub trait StatusSink: Send + Sync {
    /// Returns true if `version` is still the current session version.
    fn is_current(&self, version: SessionVersion) -> bool;

    /// Applies `event` if `version` is still the current session version.
    ///
    /// Returns false, without changing anything, when the version is stale.
    fn apply(&self, version: SessionVersion, event: StatusEvent) -> bool;
}

/// How a poll loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The query succeeded; results can be loaded.
    Succeeded,
    /// The query failed or polling gave up; already applied to the sink.
    Errored(ShellError),
    /// The session moved on; nothing was applied.
    Superseded,
}

/// Drives repeated status checks for one query.
pub struct ResultPoller<'a> {
    backend: &'a dyn QueryBackend,
    interval: Duration,
    retry: RetryPolicy,
}

impl<'a> ResultPoller<'a> {
    /// Creates a poller checking every `interval`.
    pub fn new(backend: &'a dyn QueryBackend, interval: Duration, retry: RetryPolicy) -> Self {
        Self {
            backend,
            interval,
            retry,
        }
    }

    /// Polls `query_id` until it settles, the session moves on, or `cancel` fires.
    pub async fn poll(
        &self,
        query_id: &QueryId,
        version: SessionVersion,
        sink: &dyn StatusSink,
        cancel: &CancellationToken,
    ) -> PollOutcome {
        let mut last_event: Option<StatusEvent> = None;
        let mut failures: u32 = 0;
        let mut delay = Duration::ZERO;
        let mut escalation: Option<ShellError> = None;

        loop {
            if !delay.is_zero() && !sleep_or_cancel(delay, cancel).await {
                debug!(%query_id, %version, "poll cancelled while waiting");
                return PollOutcome::Superseded;
            }

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(%query_id, %version, "poll cancelled in flight");
                    return PollOutcome::Superseded;
                }
                response = self.backend.query_status(query_id) => response,
            };

            let event = match response {
                Ok(status) => {
                    failures = 0;
                    delay = self.interval;
                    match status.status {
                        RemoteStatus::Provisioning => StatusEvent::Provisioning,
                        RemoteStatus::Running => StatusEvent::Running,
                        RemoteStatus::Succeeded => StatusEvent::Succeeded,
                        RemoteStatus::Errored => StatusEvent::Errored(
                            status
                                .error_message
                                .unwrap_or_else(|| "query failed".to_string()),
                        ),
                        RemoteStatus::Cancelled => StatusEvent::Errored(
                            status
                                .error_message
                                .unwrap_or_else(|| REMOTE_CANCEL_MESSAGE.to_string()),
                        ),
                    }
                }
                Err(e) if e.is_transient() && failures < self.retry.max_retries => {
                    delay = self.retry.backoff(failures);
                    failures += 1;
                    warn!(
                        %query_id,
                        "status check failed (attempt {}), retrying in {:?}: {}",
                        failures,
                        delay,
                        e
                    );
                    continue;
                }
                Err(e) => {
                    let message = if e.is_transient() {
                        format!(
                            "status check failed after {} retries: {}",
                            failures,
                            e.message()
                        )
                    } else {
                        format!("status check failed: {}", e.message())
                    };
                    escalation = Some(ShellError::poll_transport(message.clone()));
                    StatusEvent::Errored(message)
                }
            };

            if last_event.as_ref() == Some(&event) {
                if !sink.is_current(version) {
                    debug!(%query_id, %version, "dropping stale status response");
                    return PollOutcome::Superseded;
                }
                continue;
            }

            if !sink.apply(version, event.clone()) {
                debug!(%query_id, %version, "dropping stale status response");
                return PollOutcome::Superseded;
            }

            match event {
                StatusEvent::Succeeded => {
                    info!(%query_id, "query succeeded");
                    return PollOutcome::Succeeded;
                }
                StatusEvent::Errored(message) => {
                    info!(%query_id, "query errored: {}", message);
                    let error = escalation
                        .take()
                        .unwrap_or_else(|| ShellError::poll_terminal(message));
                    return PollOutcome::Errored(error);
                }
                other => {
                    debug!(%query_id, "query is {:?}", other);
                    last_event = Some(other);
                }
            }
        }
    }
}

/// Sleeps for `delay`; returns false if `cancel` fired first.
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
