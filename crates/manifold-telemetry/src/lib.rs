//! # Manifold Telemetry
//!
//! Logging and metrics for processes embedding the Manifold bus.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` registry with `EnvFilter` and a
//!   pretty or JSON fmt layer
//! - **Metrics**: Prometheus registry with bus, analyzer, and wormhole
//!   metrics, rendered with [`encode_metrics`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use manifold_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let config = TelemetryConfig::from_env();
//! let _guard = init_telemetry(&config)?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `MANIFOLD_SERVICE_NAME` | `manifold` | Service name in logs |
//! | `MANIFOLD_LOG_LEVEL` | `info` | Log filter, `RUST_LOG` as fallback |
//! | `MANIFOLD_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `MANIFOLD_JSON_LOGS` | `false` | JSON logs (default `true` in containers) |
//! | `MANIFOLD_METRICS` | `true` | Register Prometheus metrics |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{encode_metrics, register_metrics, HistogramTimer, MetricsHandle};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),
}

/// Initialize logging and, when enabled, metrics.
///
/// # Errors
///
/// Propagates logging or metrics initialization failures.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = if config.metrics_enabled {
        Some(register_metrics()?)
    } else {
        None
    };
    init_logging(config)?;

    Ok(TelemetryGuard { metrics })
}

/// Guard that keeps telemetry active for the lifetime of the process.
pub struct TelemetryGuard {
    metrics: Option<MetricsHandle>,
}

impl TelemetryGuard {
    #[must_use]
    pub fn metrics_enabled(&self) -> bool {
        self.metrics.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry...");
    }
}

/// Record a counter increment, optionally with label values.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}
