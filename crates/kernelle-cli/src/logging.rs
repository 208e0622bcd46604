use tracing_subscriber::EnvFilter;

pub(crate) const LOG_ENV: &str = "KERNELLE_LOG";
const DEFAULT_FILTER: &str = "warn";

pub(crate) fn log_filter(value: Option<&str>) -> EnvFilter {
    value
        .filter(|value| !value.trim().is_empty())
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_FILTER))
}

/// Diagnostics go to stderr so stdout stays the report.
pub(crate) fn init_logging() {
    let filter = log_filter(std::env::var(LOG_ENV).ok().as_deref());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}
