//! Development-time tracing for debugging the runner.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: dev diagnostics via `RUST_LOG`, output to
//!   stderr. Not persisted, not part of runner product output.
//!
//! - **Session artifacts (`io::ledger`, per-attempt logs)**: product output
//!   under the session directory. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber for development logging.
///
/// `RUST_LOG` takes full control when set. The default shows this crate's
/// task lifecycle at `info` while keeping dependencies at `warn`, so an
/// unattended run leaves a readable stderr trail without drowning the agent
/// output tee.
///
/// # Example
/// ```bash
/// RUST_LOG=tm_longrun::io::executor=debug tm-longrun run
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn default_filter() -> EnvFilter {
    EnvFilter::new("warn")
        .add_directive("tm_longrun=info".parse().expect("static filter directive"))
}
