//! Tracing subscriber setup.

use crate::config::LogConfig;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `config.level`. Later calls are no-ops, so tests
/// and embedders may call this freely.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
