//! Diagnostic tracing for batch runs.
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted.
//! - **Batch summary (`io/summary`)**: product artifact next to the result
//!   store. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`. Defaults to `warn` if unset, so per-job failures and
/// extraction misses are visible without configuration.
///
/// # Example
/// ```bash
/// RUST_LOG=simbatch=debug simbatch run --level l1 --subdir berti --label exp1
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
