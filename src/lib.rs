//! log-shell - asynchronous query engine for a log-analytics SQL shell.
//!
//! Submits SQL to a remote query service, follows the job through polling,
//! and pages results in incrementally while discarding responses that belong
//! to superseded queries. Rendering is left to the embedding application,
//! which drives a [`QueryShell`] and reads its [`SessionSnapshot`]s.

pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod query;
pub mod session;

pub use config::ShellConfig;
pub use error::{Result, ShellError};
pub use session::{
    FetchOutcome, QueryHandle, QueryShell, SessionSnapshot, SessionStatus, SessionVersion,
};
