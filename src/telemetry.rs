//! Log subscriber setup for the `username-avail` binary.
//!
//! The library itself only emits `tracing` events; embedding UIs install
//! whatever subscriber they use.

use tracing_subscriber::EnvFilter;

/// Install a stderr `fmt` subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the crate logs at `warn`, or at
/// `debug` when `verbose` is true.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbose));
    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn default_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("username_avail=debug,warn")
    } else {
        EnvFilter::new("warn")
    }
}
