//! Structured logging.
//!
//! `RUST_LOG` wins over the configured level so an operator can raise
//! verbosity without editing the config file.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter(level: &str) -> String {
    format!("ca_gateway={level},tower_http={level},pushctl={level}")
}

/// Install the global subscriber. Later calls are ignored.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(level)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_parses() {
        let directives = default_filter("debug");
        assert!(directives.contains("ca_gateway=debug"));
        assert!(EnvFilter::try_new(directives).is_ok());
    }

    #[test]
    fn init_twice_is_harmless() {
        init_logging("info");
        init_logging("debug");
    }
}
