//! Logging setup using `tracing` and `tracing-subscriber`

use tracing_subscriber::{EnvFilter, fmt};

/// Initialize logging for the command line tool.
///
/// The level comes from `RUST_LOG` (default: `info`), for example
/// `RUST_LOG=factory_planner::solver=debug`. Logs go to stderr so that
/// command output on stdout stays clean.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Initialize debug logging for tests; safe to call more than once.
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}
