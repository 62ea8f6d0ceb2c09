//! Process-wide tracing setup.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "info";

/// Installs the global subscriber: `RUST_LOG` filtering (default `info`),
/// human-readable or JSON output, and `log` records bridged into tracing so
/// the database layer shows up in the same stream.
///
/// Safe to call multiple times (subsequent calls are no-ops). Returns
/// whether this call installed the subscriber.
pub fn init(json: bool) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if json {
        tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_target(false)),
        )
    } else {
        tracing::subscriber::set_global_default(registry.with(fmt::layer()))
    };
    if installed.is_err() {
        return false;
    }

    if tracing_log::LogTracer::init().is_err() {
        tracing::debug!("log records are already routed elsewhere");
    }
    true
}
