//! Subscriber setup shared by the binaries

use es_compat_core::config::ObservabilityConfig;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over the configured level;
/// `level_override` (from the command line) wins over both.
pub fn init_tracing(config: &ObservabilityConfig, level_override: Option<&str>) {
    let filter = match level_override {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
    };

    let registry = tracing_subscriber::registry().with(filter);
    // A second init (tests, embedding) keeps the first subscriber
    if config.log_format.eq_ignore_ascii_case("pretty") {
        registry.with(fmt::layer().pretty()).try_init().ok();
    } else {
        registry.with(fmt::layer().json()).try_init().ok();
    }
}
