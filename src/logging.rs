//! Logging initialization for foreman.
//!
//! Logs go to stderr so agent output and user-facing notices keep
//! stdout to themselves. `RUST_LOG` overrides the configured level.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging.
///
/// * `debug_override` - If true, override log level to "debug" (from the --debug flag)
pub fn init_logging(debug_override: bool) {
    let default_level = if debug_override { "debug" } else { "info" };

    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
