//! Diagnostic tracing for the CLI and server.
//!
//! Tracing goes to stderr and is controlled by `RUST_LOG`. The activity log in
//! `.cascade/activity.json` is a product artifact and is written regardless.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter for the `cascade` CLI.
pub const CLI_FILTER: &str = "warn";
/// Default filter for `cascade-server`.
pub const SERVER_FILTER: &str = "cascade=info,cascade_server=info";

/// Install a compact stderr subscriber, using `default_filter` when `RUST_LOG` is unset.
///
/// ```bash
/// RUST_LOG=cascade=debug cascade run
/// ```
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
