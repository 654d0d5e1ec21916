//! # Pulse Telemetry
//!
//! Structured logging and Prometheus metrics for the messaging core.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pulse_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(TelemetryConfig::from_env())?;
//! // Logs go through `tracing`, counters are exported by `encode_metrics()`.
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PULSE_SERVICE_NAME` | `pulse` | Service name in log lines |
//! | `PULSE_LOG_LEVEL` | `info` | Log level filter (`RUST_LOG` also honoured) |
//! | `PULSE_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `PULSE_JSON_LOGS` | `false` (`true` in containers) | JSON log lines |

#![cfg_attr(test, allow(clippy::unwrap_used))]

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{init_logging, init_test_logging};
pub use metrics::{
    encode_metrics, register_metrics, HistogramTimer, BUS_DELIVERIES, BUS_DISPATCH_DURATION,
    EMITS_DROPPED, FRAMES_RECEIVED, HANDSHAKE_OUTCOMES, PULSES_EMITTED, RECONNECT_ATTEMPTS,
    REGISTRY_EVICTIONS, REGISTRY_SIZE,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and register metrics.
///
/// Returns a guard that should be held for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    // Metrics first: they cannot fail because of a foreign subscriber.
    register_metrics()?;
    logging::init_logging(&config)?;

    Ok(TelemetryGuard {
        service_name: config.service_name,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "Shutting down telemetry");
    }
}
