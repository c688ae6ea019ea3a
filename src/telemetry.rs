//! Tracing initialization.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber. `RUST_LOG` wins; otherwise
/// the given default level applies.
pub fn init(default_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}
