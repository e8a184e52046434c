//! Process-wide tracing setup shared by the binaries.

/// Install the global subscriber (JSON lines, `RUST_LOG` filter, default `info`).
///
/// Safe to call more than once; only the first call installs anything.
pub fn init() {
    tracing::init();
}

pub mod tracing;
