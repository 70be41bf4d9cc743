//! Diagnostics for the `orch` binary.
//!
//! Tracing output goes to stderr and is filtered by `RUST_LOG` (default
//! `info`). Agent output is not tracing; it is stored as execution logs and
//! printed to stdout by the commands that follow a task.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
