//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

use crate::ObservabilityConfig;

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with(&ObservabilityConfig::default());
}

/// `RUST_LOG` wins over `config.log_level`; an unparsable level falls back
/// to `info`.
pub fn init_with(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    // try_init fails once a global subscriber exists; that is the no-op path.
    let _ = if config.json_logging {
        builder.json().try_init()
    } else {
        builder.pretty().try_init()
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_a_no_op() {
        init();
        init_with(&ObservabilityConfig {
            log_level: "debug".into(),
            json_logging: false,
        });
        init();
    }

    #[test]
    fn garbage_level_does_not_panic() {
        init_with(&ObservabilityConfig {
            log_level: "=&=".into(),
            json_logging: true,
        });
    }
}
