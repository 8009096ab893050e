//! Integration tests for log-shell.

pub mod common;
pub mod lifecycle_test;
