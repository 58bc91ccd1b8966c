//! Logging setup

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[allow(dead_code)]
pub(crate) fn build_loglevel_filter_layer(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.to_string()))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global tracing subscriber. Call once at process start.
pub fn init_tracing(log_level: &str) -> Result<(), String> {
    let subscriber = tracing_subscriber::registry()
        .with(build_loglevel_filter_layer(log_level))
        .with(tracing_subscriber::fmt::layer());
    subscriber
        .try_init()
        .map_err(|err| format!("failed to install tracing subscriber: {err}"))
}
