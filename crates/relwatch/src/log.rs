use tracing_subscriber::EnvFilter;

/// Initializes the global subscriber. `LOG_LEVEL` takes any env-filter
/// directive; the default keeps our crates at info.
pub fn init() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,hyper=warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
