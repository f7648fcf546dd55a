use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Installs a console `tracing` subscriber filtered by `RUST_LOG`,
/// falling back to `default_filter`.
///
/// The library itself never installs a subscriber; binaries and tests call
/// this once. Returns `false` if a global subscriber was already set.
pub fn init_tracing(default_filter: &str) -> bool {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).compact())
        .try_init()
        .is_ok()
}
