//! Tracing initialization
//!
//! Host processes call this once at startup; repeated calls are no-ops so
//! tests can call it freely.

use ragpipe_config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber from logging configuration.
///
/// `RUST_LOG` overrides the configured level when set.
pub fn init_tracing(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let already_set = if config.json {
        builder.json().try_init().is_err()
    } else {
        builder.try_init().is_err()
    };

    if already_set {
        tracing::debug!("tracing subscriber already initialized");
    }
}
