//! Subscriber configuration.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info";

/// JSON formatter filtered by `RUST_LOG`.
///
/// A second call (e.g. several test servers in one process) is a no-op.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_current_span(true)
        .with_target(false)
        .try_init();
}
