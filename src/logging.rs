//! Optional `tracing-subscriber` setup for binaries embedding the executor.
//!
//! The filter comes from the `TASKGRAPH_LOG` environment variable, using the
//! `EnvFilter` directive syntax (e.g. `taskgraph=debug`), and defaults to
//! `info`.

use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "TASKGRAPH_LOG";

/// Install a global subscriber writing to stderr.
///
/// # Errors
/// If a global subscriber is already installed.
pub fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init()
}
