//! Shared helpers for the integration tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log_shell::backend::{Cell, MockBackend, QueryBackend, RawRow};
use log_shell::{QueryShell, SessionStatus, ShellConfig};
use tokio::task::JoinHandle;

/// Default poll interval, in milliseconds.
pub const POLL_MS: u64 = 1500;

/// Creates a shell over `backend` with the default configuration.
pub fn shell_with(backend: &Arc<MockBackend>) -> QueryShell {
    shell_with_config(backend, ShellConfig::default())
}

/// Creates a shell over `backend` with `config`.
pub fn shell_with_config(backend: &Arc<MockBackend>, config: ShellConfig) -> QueryShell {
    let backend: Arc<dyn QueryBackend> = backend.clone();
    QueryShell::new(backend, config).unwrap()
}

/// Log rows numbered `range`, each with an `n`, a timestamp and a message.
pub fn log_rows(range: std::ops::Range<usize>) -> Vec<RawRow> {
    range
        .map(|n| {
            vec![
                Cell::new("n", n.to_string()),
                Cell::new("p_event_time", format!("2024-01-01 00:00:{:02}", n % 60)),
                Cell::new("message", format!("event {n}")),
            ]
        })
        .collect()
}

/// Values of the `n` column, in row order.
pub fn row_numbers(shell: &QueryShell) -> Vec<usize> {
    shell
        .snapshot()
        .rows
        .iter()
        .filter_map(|r| r.get("n"))
        .filter_map(|n| n.parse().ok())
        .collect()
}

/// Advances the paused clock by `ms` milliseconds.
pub async fn advance_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

/// Records every distinct status the shell passes through.
pub struct StatusTrail {
    seen: Arc<Mutex<Vec<SessionStatus>>>,
    task: JoinHandle<()>,
}

impl StatusTrail {
    /// Starts recording, beginning with the current status.
    pub fn start(shell: &QueryShell) -> Self {
        let seen = Arc::new(Mutex::new(vec![shell.status()]));
        let mut changes = shell.subscribe();
        let shell = shell.clone();
        let recorded = seen.clone();

        let task = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let status = shell.status();
                let mut seen = recorded.lock().unwrap();
                if seen.last() != Some(&status) {
                    seen.push(status);
                }
            }
        });

        Self { seen, task }
    }

    /// Stops recording and returns the statuses seen.
    pub fn finish(self) -> Vec<SessionStatus> {
        self.task.abort();
        self.seen.lock().unwrap().clone()
    }
}
