//! Logging setup
//!
//! The library only emits `tracing` events. Applications that want them on
//! stderr call [`init`] once; `RUST_LOG` takes precedence over the level
//! passed in.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::config::LoggingConfig;

/// Install a global fmt subscriber filtered at `level`.
///
/// Returns false when the level is invalid or a global subscriber is
/// already installed, so repeated calls are harmless.
pub fn init(level: &str) -> bool {
    let filter = match EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level)) {
        Ok(filter) => filter,
        Err(_) => return false,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}

/// [`init`] at the level named in a config
pub fn init_from_config(config: &LoggingConfig) -> bool {
    init(&config.level)
}
