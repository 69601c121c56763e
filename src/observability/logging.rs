//! # Structured Logging
//!
//! Initializes the tracing subscriber for the engine. Log lines never carry
//! secret plaintext, key material, IVs, tags, or token cleartext; callers
//! log identifiers and outcome metadata only.

use crate::config::ObservabilityConfig;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize logging from configuration.
///
/// `RUST_LOG` overrides the configured level when set. Safe to call more
/// than once; subsequent calls are no-ops.
pub fn init_logging(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let builder = fmt().with_env_filter(filter).with_target(true);

    let result = if config.json_logs {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };

    // A second init (tests, embedding applications) is not an error worth
    // surfacing.
    if result.is_err() {
        tracing::debug!("Logging already initialized, skipping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_twice_is_harmless() {
        let config = ObservabilityConfig::default();
        init_logging(&config);
        init_logging(&config);
    }
}
