//! Diagnostic tracing for the loop itself.
//!
//! This is separate from the per-round artifacts under `.taskloop/iterations/`
//! (see [`crate::io::iteration_log`]), which are always written. Tracing goes
//! to stderr only, so it never mixes with the round lines printed on stdout.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the stderr subscriber. `RUST_LOG` selects the filter, `warn` if unset.
///
/// ```bash
/// RUST_LOG=taskloop=debug taskloop run PRD-20261019-auth.md
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();
}
