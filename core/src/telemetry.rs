// Tracing subscriber setup shared by the shell binary and tests
use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber.
///
/// The filter comes from `RUST_LOG` when set, otherwise from `default_filter`
/// (e.g. `"info,voicelab_core=debug"`). Returns `false` when a global subscriber
/// was already installed, which is not treated as an error.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
