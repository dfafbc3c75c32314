//! Logging setup for binaries embedding Conveyor.
//!
//! Library code only uses `tracing` macros; whoever owns `main` calls
//! [`init`] once.

use tracing_subscriber::EnvFilter;

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, logged once at startup.
    pub service_name: String,

    /// Default filter (e.g. "debug", "info,conveyor=trace").
    /// Overridden by `RUST_LOG`.
    pub default_level: String,

    /// Emit one JSON object per line instead of compact text.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "conveyor".into(),
            default_level: "info".into(),
            json: false,
        }
    }
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_level));

    let installed = if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .compact()
            .try_init()
            .is_ok()
    };

    if installed {
        tracing::info!(service = %config.service_name, json = config.json, "logging initialized");
    }
}
