//! Result aggregation.
//!
//! Provides the pure state of one query's fetched results, separated from the
//! network calls that feed it. The session owns an aggregator per query and
//! drives it in two steps: `begin_fetch` claims the single fetch slot and
//! yields the request to send, then `apply_page` or `fail_fetch` settles it.
//! Keeping the slot in the aggregator is what makes duplicate "load more"
//! triggers harmless.

use tracing::debug;

use super::projector::{discover_columns, project, Record};
use crate::backend::{QueryBackend, QueryId, ResultPage, ResultsRequest};
use crate::error::{Result, ShellError};

/// Accumulated results of one query.
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    query_id: QueryId,
    page_size: Option<u32>,
    columns: Vec<String>,
    rows: Vec<Record>,
    next_cursor: Option<String>,
    pages_loaded: usize,
    is_fetching_more: bool,
    exhausted: bool,
    last_error: Option<String>,
}

impl ResultAggregator {
    /// Creates an empty aggregator for a succeeded query.
    pub fn new(query_id: QueryId, page_size: Option<u32>) -> Self {
        Self {
            query_id,
            page_size,
            columns: Vec::new(),
            rows: Vec::new(),
            next_cursor: None,
            pages_loaded: 0,
            is_fetching_more: false,
            exhausted: false,
            last_error: None,
        }
    }

    /// Claims the fetch slot and returns the request for the next page.
    ///
    /// Returns `None` without changing anything when every page has arrived
    /// or a fetch is already in flight.
    pub fn begin_fetch(&mut self) -> Option<ResultsRequest> {
        if self.exhausted || self.is_fetching_more {
            return None;
        }
        self.is_fetching_more = true;
        Some(ResultsRequest {
            query_id: self.query_id.clone(),
            cursor: self.next_cursor.clone(),
            page_size: self.page_size,
        })
    }

    /// Appends a page in arrival order and releases the fetch slot.
    ///
    /// Columns come from the first row ever received and are never revisited.
    /// If that row has only blank keys the header stays empty and every later
    /// row projects to an empty record.
    ///
    /// Returns the number of rows appended.
    pub fn apply_page(&mut self, page: ResultPage) -> usize {
        if self.columns.is_empty() && self.rows.is_empty() {
            if let Some(first) = page.rows.first() {
                self.columns = discover_columns(first);
            }
        }

        let appended = page.rows.len();
        let columns = &self.columns;
        self.rows
            .extend(page.rows.iter().map(|row| project(row, columns)));

        self.exhausted = page.next_cursor.is_none();
        self.next_cursor = page.next_cursor;
        self.pages_loaded += 1;
        self.is_fetching_more = false;
        self.last_error = None;

        debug!(
            query_id = %self.query_id,
            appended,
            total = self.rows.len(),
            pages = self.pages_loaded,
            exhausted = self.exhausted,
            "page appended"
        );
        appended
    }

    /// Records a failed fetch. Rows and cursor are left as they were, so the
    /// same page can be requested again.
    pub fn fail_fetch(&mut self, error: &ShellError) {
        self.is_fetching_more = false;
        self.last_error = Some(error.message().to_string());
    }

    /// Releases the fetch slot of a request whose response will be ignored.
    pub fn abandon_fetch(&mut self) {
        self.is_fetching_more = false;
    }

    /// Display columns, fixed once the first row arrived.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// All rows fetched so far, in server order.
    pub fn rows(&self) -> &[Record] {
        &self.rows
    }

    /// Number of pages applied.
    pub fn pages_loaded(&self) -> usize {
        self.pages_loaded
    }

    /// True while a page fetch is in flight.
    pub fn is_fetching_more(&self) -> bool {
        self.is_fetching_more
    }

    /// True once a page without a cursor has arrived.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Message of the last failed fetch, cleared by the next successful one.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}

/// Requests one page from the backend, reporting failures as `ShellError::Fetch`.
pub async fn fetch_page(backend: &dyn QueryBackend, request: &ResultsRequest) -> Result<ResultPage> {
    backend
        .query_results(request)
        .await
        .map_err(|e| ShellError::fetch(e.message()))
}
