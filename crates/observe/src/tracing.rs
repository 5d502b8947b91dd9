use {std::sync::Once, tracing_subscriber::EnvFilter};

static INIT: Once = Once::new();

/// Initializes the global tracing subscriber with the given `EnvFilter`
/// directives. Set-once: repeated calls (tests, multiple components in one
/// process) are no-ops.
pub fn initialize(env_filter: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_new(env_filter).unwrap_or_else(|err| {
            eprintln!("invalid log filter {env_filter:?}: {err}, falling back to info");
            EnvFilter::new("info")
        });
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    });
}
