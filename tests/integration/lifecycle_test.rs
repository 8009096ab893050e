//! Query lifecycle integration tests.
//!
//! Tests submission, polling and settlement as observed through the public API.

use std::sync::Arc;
use std::time::Duration;

use log_shell::backend::{MockBackend, MockGate, MockQuery, QueryId, RemoteStatus};
use log_shell::{FetchOutcome, SessionStatus, ShellConfig, ShellError};
use pretty_assertions::assert_eq;
use tokio_test::assert_ok;

use super::common::{advance_ms, log_rows, shell_with, shell_with_config, StatusTrail, POLL_MS};

#[tokio::test(start_paused = true)]
async fn test_limit_query_runs_to_exhausted_results() {
    let backend =
        Arc::new(MockBackend::new().with_query(MockQuery::succeeding(vec![log_rows(0..10)])));
    let shell = shell_with(&backend);
    let trail = StatusTrail::start(&shell);

    let handle = shell.submit_query("SELECT * FROM logs LIMIT 10");
    assert_eq!(shell.status(), SessionStatus::Provisioning);
    assert_ok!(handle.wait().await);
    tokio::task::yield_now().await;

    assert_eq!(
        trail.finish(),
        vec![
            SessionStatus::Idle,
            SessionStatus::Provisioning,
            SessionStatus::Running,
            SessionStatus::Succeeded,
        ]
    );

    let snapshot = shell.snapshot();
    assert_eq!(snapshot.row_count(), 10);
    assert_eq!(
        snapshot.columns,
        vec![
            "n".to_string(),
            "p_event_time".to_string(),
            "message".to_string()
        ]
    );
    assert!(snapshot.exhausted);
    assert!(!snapshot.is_fetching_more);
    assert_eq!(snapshot.error_message, None);

    assert_eq!(shell.fetch_more_results().await, FetchOutcome::Skipped);
    assert_eq!(backend.results_requests().len(), 1);
    assert_eq!(shell.snapshot().row_count(), 10);
}

#[tokio::test(start_paused = true)]
async fn test_status_is_observable_between_polls() {
    let backend =
        Arc::new(MockBackend::new().with_query(MockQuery::succeeding(vec![log_rows(0..1)])));
    let shell = shell_with(&backend);

    let handle = shell.submit_query("SELECT * FROM logs");
    advance_ms(100).await;
    // The backend still reports provisioning, but the query id is back.
    let snapshot = shell.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Running);
    assert_eq!(snapshot.query_id, Some(QueryId::new("query-1")));
    assert_eq!(backend.status_calls(), 1);

    advance_ms(POLL_MS).await;
    assert_eq!(shell.status(), SessionStatus::Running);

    advance_ms(POLL_MS).await;
    assert_eq!(shell.status(), SessionStatus::Succeeded);
    assert!(handle.is_finished());
    assert_eq!(backend.status_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_query_id_is_absent_while_provisioning() {
    let gate = MockGate::new();
    let backend = Arc::new(
        MockBackend::new()
            .with_submit_gate(&gate)
            .with_query(MockQuery::succeeding(vec![log_rows(0..1)])),
    );
    let shell = shell_with(&backend);

    let handle = shell.submit_query("SELECT * FROM logs");
    advance_ms(5000).await;
    let snapshot = shell.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Provisioning);
    assert_eq!(snapshot.query_id, None);
    assert_eq!(snapshot.elapsed, Duration::ZERO);
    assert_eq!(backend.status_calls(), 0);

    gate.open();
    advance_ms(10).await;
    let snapshot = shell.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Running);
    assert_eq!(snapshot.query_id, Some(QueryId::new("query-1")));
    assert_eq!(snapshot.elapsed, Duration::from_millis(10));

    assert_ok!(handle.wait().await);
    assert_eq!(shell.status(), SessionStatus::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn test_provisioning_straight_to_success_still_runs() {
    let backend = Arc::new(
        MockBackend::new().with_query(
            MockQuery::new()
                .statuses([RemoteStatus::Provisioning, RemoteStatus::Succeeded])
                .page(log_rows(0..3)),
        ),
    );
    let shell = shell_with(&backend);
    let trail = StatusTrail::start(&shell);

    let snapshot = shell.execute("SELECT * FROM logs").await.unwrap();
    tokio::task::yield_now().await;

    assert_eq!(
        trail.finish(),
        vec![
            SessionStatus::Idle,
            SessionStatus::Provisioning,
            SessionStatus::Running,
            SessionStatus::Succeeded,
        ]
    );
    assert_eq!(snapshot.row_count(), 3);
    assert_eq!(snapshot.elapsed, Duration::from_millis(POLL_MS));
}

#[tokio::test(start_paused = true)]
async fn test_backend_error_is_surfaced_verbatim() {
    let backend = Arc::new(
        MockBackend::new().with_query(
            MockQuery::new()
                .statuses([RemoteStatus::Provisioning, RemoteStatus::Running])
                .errored("syntax error near SELECT"),
        ),
    );
    let shell = shell_with(&backend);

    let snapshot = shell.execute("SELECT SELECT").await.unwrap();

    assert_eq!(snapshot.status, SessionStatus::Errored);
    assert_eq!(
        snapshot.error_message.as_deref(),
        Some("syntax error near SELECT")
    );
    assert!(snapshot.rows.is_empty());
    assert!(snapshot.columns.is_empty());
    assert!(backend.results_requests().is_empty());
    // Terminal errors are not retried.
    assert_eq!(backend.status_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_empty_query_is_a_submission_error() {
    let backend = Arc::new(MockBackend::new());
    let shell = shell_with(&backend);

    let snapshot = shell.execute("   ").await.unwrap();

    assert_eq!(snapshot.status, SessionStatus::Errored);
    assert_eq!(snapshot.error_message.as_deref(), Some("Query text is empty"));
    assert!(backend.submissions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_transient_poll_failures_are_retried() {
    let backend = Arc::new(
        MockBackend::new().with_query(
            MockQuery::new()
                .statuses([RemoteStatus::Running])
                .status_error(ShellError::transport("connection reset"))
                .status_error(ShellError::transport("connection reset"))
                .statuses([RemoteStatus::Succeeded])
                .page(log_rows(0..4)),
        ),
    );
    let shell = shell_with(&backend);

    let snapshot = shell.execute("SELECT * FROM logs").await.unwrap();

    assert_eq!(snapshot.status, SessionStatus::Succeeded);
    assert_eq!(snapshot.row_count(), 4);
    assert_eq!(backend.status_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_poll_failures_escalate_after_retry_budget() {
    let backend = Arc::new(
        MockBackend::new().with_query(
            MockQuery::new()
                .statuses([RemoteStatus::Running])
                .status_error(ShellError::transport("gateway timeout"))
                .status_error(ShellError::transport("gateway timeout"))
                .status_error(ShellError::transport("gateway timeout")),
        ),
    );
    let config = ShellConfig {
        max_poll_retries: 2,
        ..ShellConfig::default()
    };
    let shell = shell_with_config(&backend, config);

    let snapshot = shell.execute("SELECT * FROM logs").await.unwrap();

    assert_eq!(snapshot.status, SessionStatus::Errored);
    let message = snapshot.error_message.unwrap();
    assert!(message.contains("after 2 retries"), "message: {}", message);
    assert!(message.contains("gateway timeout"), "message: {}", message);
    assert_eq!(backend.status_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_remote_cancel_ends_in_error() {
    let backend = Arc::new(MockBackend::new().with_query(
        MockQuery::new().statuses([RemoteStatus::Running, RemoteStatus::Cancelled]),
    ));
    let shell = shell_with(&backend);

    let snapshot = shell.execute("SELECT * FROM logs").await.unwrap();

    assert_eq!(snapshot.status, SessionStatus::Errored);
    assert_eq!(
        snapshot.error_message.as_deref(),
        Some("query was cancelled by the backend")
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_polling() {
    let backend = Arc::new(
        MockBackend::new().with_query(MockQuery::new().statuses([RemoteStatus::Running])),
    );
    let shell = shell_with(&backend);

    let handle = shell.submit_query("SELECT * FROM logs");
    advance_ms(2 * POLL_MS + 100).await;
    let calls = backend.status_calls();
    assert_eq!(calls, 3);

    assert!(shell.cancel_query());
    assert_ok!(handle.wait().await);
    advance_ms(10 * POLL_MS).await;

    let snapshot = shell.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Cancelled);
    assert_eq!(snapshot.error_message, None);
    assert_eq!(backend.status_calls(), calls);
    // No cancel endpoint, so abandonment stays client-side.
    assert!(backend.cancelled().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_elapsed_time_tracks_running_and_resets() {
    let gate = MockGate::new();
    let backend = Arc::new(
        MockBackend::new()
            .with_submit_gate(&gate)
            .with_query(
                MockQuery::new()
                    .statuses([RemoteStatus::Provisioning, RemoteStatus::Running]),
            )
            .with_query(MockQuery::new()),
    );
    let shell = shell_with(&backend);

    shell.submit_query("SELECT * FROM logs");
    advance_ms(2000).await;
    assert_eq!(shell.snapshot().elapsed, Duration::ZERO);

    // The clock starts when the submission is accepted, at 2s.
    gate.open();
    advance_ms(POLL_MS + 2600).await;
    let snapshot = shell.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Running);
    assert_eq!(snapshot.elapsed_seconds, 4);

    advance_ms(2000).await;
    assert_eq!(shell.snapshot().elapsed_seconds, 6);

    shell.submit_query("SELECT count(*) FROM logs");
    let snapshot = shell.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Provisioning);
    assert_eq!(snapshot.elapsed, Duration::ZERO);
    assert_eq!(snapshot.elapsed_seconds, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_success_keeps_rows() {
    let backend =
        Arc::new(MockBackend::new().with_query(MockQuery::succeeding(vec![log_rows(0..5)])));
    let shell = shell_with(&backend);
    let settled = shell.execute("SELECT * FROM logs").await.unwrap();

    assert!(shell.cancel_query());

    let snapshot = shell.snapshot();
    assert_eq!(snapshot.status, SessionStatus::Cancelled);
    assert_eq!(snapshot.version, settled.version.next());
    assert_eq!(snapshot.row_count(), 5);
    assert_eq!(snapshot.elapsed, settled.elapsed);
    assert_eq!(shell.fetch_more_results().await, FetchOutcome::Skipped);
}

#[tokio::test(start_paused = true)]
async fn test_elapsed_time_freezes_when_settled() {
    let backend = Arc::new(MockBackend::new().with_query(
        MockQuery::new()
            .statuses([
                RemoteStatus::Running,
                RemoteStatus::Running,
                RemoteStatus::Running,
                RemoteStatus::Succeeded,
            ])
            .page(log_rows(0..1)),
    ));
    let shell = shell_with(&backend);

    let snapshot = shell.execute("SELECT * FROM logs").await.unwrap();
    assert_eq!(snapshot.status, SessionStatus::Succeeded);
    assert_eq!(snapshot.elapsed, Duration::from_millis(3 * POLL_MS));

    advance_ms(60_000).await;
    assert_eq!(shell.snapshot().elapsed, Duration::from_millis(3 * POLL_MS));
}
