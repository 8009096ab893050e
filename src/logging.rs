//! Logging configuration for the log shell.
//!
//! The engine is embedded in a host application, so logs go to stderr and the
//! host decides verbosity through `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Default filter directive used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_DIRECTIVE: &str = "info";

/// Builds the env filter, falling back to `default` when `RUST_LOG` is unusable.
pub fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Initializes stderr logging.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(DEFAULT_DIRECTIVE))
        .with_target(false)
        .try_init();
}
