//! Tracing subscriber setup for the binary
//!
//! The library only emits `tracing` events; installing a subscriber is left to
//! the process that embeds it.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a formatted subscriber honouring `RUST_LOG`.
///
/// Without `RUST_LOG` the crate logs at `info`, or `debug` when `verbose`.
/// Calling this twice is harmless.
pub fn init_logging(verbose: bool) {
    let default = if verbose { "chunkyard=debug" } else { "chunkyard=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
