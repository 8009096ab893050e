//! Query submission.
//!
//! Turns SQL text and a database context into a job handle. Only transport is
//! handled here: the SQL is not parsed and no retry is attempted.

use std::time::Instant;
use tracing::{info, warn};

use crate::backend::{DatabaseContext, QueryBackend, SubmitRequest, SubmitResponse};
use crate::error::{Result, ShellError};

/// Submits queries to the backend.
pub struct QuerySubmitter<'a> {
    backend: &'a dyn QueryBackend,
}

impl<'a> QuerySubmitter<'a> {
    /// Creates a new submitter.
    pub fn new(backend: &'a dyn QueryBackend) -> Self {
        Self { backend }
    }

    /// Submits `sql` against `context`.
    ///
    /// Every failure, including an empty query, comes back as
    /// `ShellError::Submission` with a message fit for display.
    pub async fn submit(&self, sql: &str, context: &DatabaseContext) -> Result<SubmitResponse> {
        if sql.trim().is_empty() {
            return Err(ShellError::submission("Query text is empty"));
        }

        let request = SubmitRequest {
            sql: sql.to_string(),
            context: context.clone(),
        };

        let start = Instant::now();
        let result = self.backend.submit_query(&request).await;
        let elapsed = start.elapsed();

        match result {
            Ok(response) => {
                info!(
                    query_id = %response.query_id,
                    database = context.database.as_deref().unwrap_or("<default>"),
                    "query submitted in {:?}",
                    elapsed
                );
                Ok(response)
            }
            Err(e) => {
                warn!("query submission failed after {:?}: {}", elapsed, e);
                Err(ShellError::submission(e.message()))
            }
        }
    }
}
