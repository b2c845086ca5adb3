//! Logging setup

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the tracing subscriber for the embedding process.
///
/// `default_level` applies when `RUST_LOG` is unset. Thread names are
/// included in each line: engine activity is spread across blocking PC/SC
/// worker threads and the `peer-dispatch` thread, and the name is usually
/// the fastest way to tell which call path a line belongs to.
pub fn init_logging(default_level: &str) -> crate::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| crate::Error::Config(format!("invalid log filter: {e}")))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_thread_names(true))
        .init();

    Ok(())
}
