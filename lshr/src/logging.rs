//! Logging setup: tracing to stderr, filtered by RUST_LOG.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "lshr=info,lshr_core=info";

/// Install the global subscriber. Stderr keeps stdout free for the prompt.
pub fn init(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("lshr=debug,lshr_core=debug")
        } else {
            EnvFilter::new(DEFAULT_FILTER)
        }
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
