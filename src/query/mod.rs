//! Query execution pipeline for the log shell.
//!
//! This module isolates the pieces a session is assembled from: submission,
//! status polling, result aggregation and row projection.

pub mod aggregator;
pub mod poller;
pub mod projector;
pub mod submitter;

pub use aggregator::{fetch_page, ResultAggregator};
pub use poller::{PollOutcome, ResultPoller, RetryPolicy, StatusEvent, StatusSink};
pub use projector::{discover_columns, project, Record};
pub use submitter::QuerySubmitter;
