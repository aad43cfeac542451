use tracing_subscriber::EnvFilter;

/// Initialize tracing with env filter support.
///
/// Set `RUST_LOG=debug` for verbose output, defaults to `info`. Returns
/// `false` if a global subscriber was already installed.
pub fn init_tracing() -> bool {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init()
        .is_ok()
}
