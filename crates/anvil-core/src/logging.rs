use tracing_subscriber::EnvFilter;

pub const ENV_LOG: &str = "ANVIL_LOG";
const DEFAULT_DIRECTIVE: &str = "warn";

/// Install the global stderr subscriber. Later calls are no-ops.
///
/// The filter comes from `ANVIL_LOG`, then `RUST_LOG`, then `warn`.
pub fn init_tracing() {
    let directive = std::env::var(ENV_LOG)
        .ok()
        .or_else(|| std::env::var(EnvFilter::DEFAULT_ENV).ok())
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_string());
    init_with_directive(&directive);
}

pub fn init_with_directive(directive: &str) {
    let filter = EnvFilter::try_new(directive).unwrap_or_else(|error| {
        eprintln!("ignoring invalid log filter '{directive}': {error}");
        EnvFilter::new(DEFAULT_DIRECTIVE)
    });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
