// Tracing subscriber setup for applications embedding the downloader

use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Install a global fmt subscriber.
///
/// `RUST_LOG` is honoured; otherwise `info`, or `debug` when `verbose`.
/// Returns an error if a global subscriber is already set.
pub fn init_logging(verbose: bool) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::builder()
            .with_default_directive(Level::INFO.into())
            .from_env_lossy()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(verbose))
        .try_init()
}
