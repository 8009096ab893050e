//! Query service abstraction for the log shell.
//!
//! Provides a trait-based interface over the three query-service RPCs
//! (submit, status, results) plus the optional cancel endpoint, so the engine
//! can run against the HTTP service or the scripted mock interchangeably.

mod http;
mod mock;
mod types;

pub use http::{HttpBackend, HttpBackendConfig};
pub use mock::{MockBackend, MockGate, MockQuery};
pub use types::{
    Cell, DatabaseContext, QueryId, RawRow, RemoteStatus, ResultPage, ResultsRequest,
    StatusResponse, SubmitRequest, SubmitResponse,
};

use crate::error::Result;
use async_trait::async_trait;

/// Trait defining the interface to the query service.
///
/// Implementations report unreachable-service conditions as
/// `ShellError::Transport` and refusals as `ShellError::Rejected`.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Submits SQL for asynchronous execution and returns its job handle.
    async fn submit_query(&self, request: &SubmitRequest) -> Result<SubmitResponse>;

    /// Returns the current remote status of a submitted query.
    async fn query_status(&self, query_id: &QueryId) -> Result<StatusResponse>;

    /// Fetches one page of results of a succeeded query.
    async fn query_results(&self, request: &ResultsRequest) -> Result<ResultPage>;

    /// Asks the backend to stop a query.
    ///
    /// Returns `Ok(false)` when the backend has no cancel endpoint.
    async fn cancel_query(&self, _query_id: &QueryId) -> Result<bool> {
        Ok(false)
    }

    /// Returns true if `cancel_query` reaches a real endpoint.
    fn supports_cancel(&self) -> bool {
        false
    }
}
