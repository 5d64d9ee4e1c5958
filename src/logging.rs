//! Diagnostic tracing for the CLI.
//!
//! Log output goes to stderr so stdout carries only the run report.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Compact output on stderr.
///
/// ```bash
/// RUST_LOG=stepchain_workflow=debug stepchain run scenario.json
/// ```
pub fn init() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr).compact())
    .init();
}
