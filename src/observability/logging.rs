//! Structured logging setup for the binary.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the configured level applies to this
/// crate and `warn` to dependencies.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(&config.log_level));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(format!("warn,template_client={}", level))
        .unwrap_or_else(|_| EnvFilter::new("warn,template_client=info"))
}
