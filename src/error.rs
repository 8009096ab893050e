//! Error types for the log shell.
//!
//! Defines the error enum shared by the backend adapters and the query engine.
//! Backend adapters only ever produce `Transport` or `Rejected`; the engine
//! reclassifies those into the submission/poll/fetch taxonomy that ends up
//! captured in session state.

use thiserror::Error;

/// Main error type for log shell operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShellError {
    /// The backend could not be reached (connect failure, timeout, 5xx).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend refused the request (validation, authorization).
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Submitting a query failed; ends the session in `Errored`.
    #[error("Submission error: {0}")]
    Submission(String),

    /// Status checks kept failing after every retry was spent.
    #[error("Polling failed: {0}")]
    PollTransport(String),

    /// The backend reported that the query itself failed.
    #[error("{0}")]
    PollTerminal(String),

    /// Fetching a page of results failed. Rows already fetched are kept.
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Configuration errors (invalid config file, out-of-range values, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ShellError {
    /// Creates a transport error with the given message.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Creates a rejection error with the given message.
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// Creates a submission error with the given message.
    pub fn submission(msg: impl Into<String>) -> Self {
        Self::Submission(msg.into())
    }

    /// Creates a poll transport error with the given message.
    pub fn poll_transport(msg: impl Into<String>) -> Self {
        Self::PollTransport(msg.into())
    }

    /// Creates a terminal poll error carrying the backend's message verbatim.
    pub fn poll_terminal(msg: impl Into<String>) -> Self {
        Self::PollTerminal(msg.into())
    }

    /// Creates a fetch error with the given message.
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    /// Creates a configuration error with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns the bare message without the category prefix.
    ///
    /// This is what ends up in `SessionSnapshot::error_message`.
    pub fn message(&self) -> &str {
        match self {
            Self::Transport(m)
            | Self::Rejected(m)
            | Self::Submission(m)
            | Self::PollTransport(m)
            | Self::PollTerminal(m)
            | Self::Fetch(m)
            | Self::Config(m)
            | Self::Internal(m) => m,
        }
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Transport(_) => "Transport Error",
            Self::Rejected(_) => "Rejected",
            Self::Submission(_) => "Submission Error",
            Self::PollTransport(_) => "Polling Error",
            Self::PollTerminal(_) => "Query Error",
            Self::Fetch(_) => "Fetch Error",
            Self::Config(_) => "Configuration Error",
            Self::Internal(_) => "Internal Error",
        }
    }
}

/// Result type alias using ShellError.
pub type Result<T> = std::result::Result<T, ShellError>;
