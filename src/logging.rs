//! Logging setup
//!
//! One stderr layer, filtered by `RUST_LOG` when set and by the requested
//! level otherwise. Watched log lines are echoed at `debug`.

use std::io;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::{Error, Result};

/// Level used when neither `RUST_LOG` nor a flag sets one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Filter for `level`, unless `RUST_LOG` is set.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `level` is not a valid filter directive.
pub fn env_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|e| Error::InvalidInput(format!("log level {level:?}: {e}")))
}

/// Install the global subscriber.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] on a bad level, or [`Error::Other`] if a
/// global subscriber is already installed.
pub fn init_logging(level: &str) -> Result<()> {
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false);

    tracing_subscriber::registry()
        .with(env_filter(level)?)
        .with(stderr_layer)
        .try_init()
        .map_err(|e| Error::Other(format!("logging already initialized: {e}")))
}
