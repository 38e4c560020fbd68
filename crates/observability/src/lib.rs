//! Process-wide tracing setup shared by every tessera binary and test harness.

use serde::Deserialize;

/// Tracing configuration (filters, layers).
pub mod tracing;

/// Initialize process-wide observability with defaults (`info`, JSON).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize with an explicit level and output format.
pub fn init_with(config: &ObservabilityConfig) {
    tracing::init_with(config);
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_json_logging")]
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_json_logging() -> bool {
    true
}
