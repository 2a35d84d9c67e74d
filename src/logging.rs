//! Logging infrastructure
//!
//! The library only emits `tracing` events; subscribers are installed by
//! whatever hosts it (the CLI here, or the embedding application).

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the logging system for a hosting binary.
///
/// The filter comes from `RUST_LOG` when set, otherwise from the configured
/// level. Logs go to stderr so stdout stays clean for command output.
pub fn init(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    // Ignore the error if a subscriber is already installed (tests).
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .try_init();
}
