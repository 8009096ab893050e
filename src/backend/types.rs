//! Wire types exchanged with the query service.
//!
//! Field names follow the service's camelCase JSON.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque job handle assigned by the backend once a submission is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(String);

impl QueryId {
    /// Wraps a backend-issued identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the identifier as sent to the backend.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Account/database context a query runs against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseContext {
    /// Database name, or `None` for the backend's default.
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "databaseName")]
    pub database: Option<String>,
}

impl DatabaseContext {
    /// Context targeting the named database.
    pub fn named(database: impl Into<String>) -> Self {
        Self {
            database: Some(database.into()),
        }
    }
}

/// Submission RPC request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    /// SQL text, never empty.
    pub sql: String,
    /// Target database context.
    #[serde(flatten)]
    pub context: DatabaseContext,
}

/// Submission RPC response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    /// Handle used to poll for status and results.
    pub query_id: QueryId,
    /// Status already known at submission time, if the query settled quickly.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RemoteStatus>,
    /// Backend message accompanying a failed `status`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl SubmitResponse {
    /// Response carrying only a job handle.
    pub fn accepted(query_id: QueryId) -> Self {
        Self {
            query_id,
            status: None,
            error_message: None,
        }
    }
}

/// Remote lifecycle state of a submitted query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteStatus {
    /// Accepted but not yet executing.
    Provisioning,
    /// Executing.
    Running,
    /// Finished; results can be fetched.
    Succeeded,
    /// Finished with an error.
    Errored,
    /// Cancelled on the backend side.
    Cancelled,
}

impl RemoteStatus {
    /// Returns true if no further remote transition will happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Errored | Self::Cancelled)
    }
}

/// Status RPC response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Current remote status.
    pub status: RemoteStatus,
    /// Message set when the query failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StatusResponse {
    /// Status response without a message.
    pub fn of(status: RemoteStatus) -> Self {
        Self {
            status,
            error_message: None,
        }
    }

    /// Failed status response with the backend's message.
    pub fn errored(message: impl Into<String>) -> Self {
        Self {
            status: RemoteStatus::Errored,
            error_message: Some(message.into()),
        }
    }
}

/// Results RPC request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsRequest {
    /// Query whose results are fetched.
    pub query_id: QueryId,
    /// Pagination cursor, `None` for the first page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Maximum rows in the page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
}

/// One `{key, value}` pair of a result row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    /// Column key.
    #[serde(default)]
    pub key: String,
    /// Cell value; `None` for SQL NULL.
    #[serde(default, deserialize_with = "lenient_value")]
    pub value: Option<String>,
}

/// Accepts non-string scalars by rendering them, so one odd cell never fails a page.
fn lenient_value<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

impl Cell {
    /// Creates a non-null cell.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// Creates a NULL cell.
    pub fn null(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }
}

/// A row exactly as delivered by the backend.
pub type RawRow = Vec<Cell>;

/// One page of results in server order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPage {
    /// Rows in server-defined order.
    #[serde(default)]
    pub rows: Vec<RawRow>,
    /// Cursor for the next page; `None` when this is the last page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl ResultPage {
    /// Creates a page from rows and an optional cursor.
    pub fn new(rows: Vec<RawRow>, next_cursor: Option<String>) -> Self {
        Self { rows, next_cursor }
    }

    /// Number of rows in the page.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the page carries no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Returns true if the backend has more rows after this page.
    pub fn has_more(&self) -> bool {
        self.next_cursor.is_some()
    }
}
