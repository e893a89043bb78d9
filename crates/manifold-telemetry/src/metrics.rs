//! Prometheus metrics for the Manifold bus.
//!
//! All metrics follow the naming convention: `manifold_<area>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: counted inline by the node's metrics middleware
//! - **Gauge**: mirrored from bus and router snapshots by a scheduler job
//! - **Histogram**: middleware pipeline latency

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Encoder, Gauge, Histogram, HistogramOpts, IntCounterVec, IntGauge,
    Opts, Registry, TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // PUBLISH PIPELINE
    // =========================================================================

    /// Publishes that entered the middleware chain
    pub static ref PUBLISH_ATTEMPTS: IntCounterVec = IntCounterVec::new(
        Opts::new("manifold_bus_publish_attempts_total", "Publishes entering the middleware chain"),
        &["channel", "kind"]
    ).expect("metric creation failed");

    /// Time spent in middleware downstream of the metrics middleware
    pub static ref MIDDLEWARE_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "manifold_bus_middleware_duration_seconds",
            "Time spent in the middleware chain per publish"
        ).buckets(exponential_buckets(0.00001, 2.0, 16).expect("valid buckets"))
    ).expect("metric creation failed");

    // =========================================================================
    // BUS SNAPSHOT
    // =========================================================================

    /// Publishes accepted past middleware and not shed
    pub static ref PUBLISHED: IntGauge = IntGauge::new(
        "manifold_bus_published_envelopes",
        "Envelopes accepted for delivery since start"
    ).expect("metric creation failed");

    /// Envelopes fanned out, forwards included
    pub static ref DELIVERED: IntGauge = IntGauge::new(
        "manifold_bus_delivered_envelopes",
        "Envelopes fanned out since start, wormhole forwards included"
    ).expect("metric creation failed");

    /// Envelopes shed under metabolic pressure
    pub static ref SHED: IntGauge = IntGauge::new(
        "manifold_bus_shed_envelopes",
        "Envelopes shed under metabolic pressure since start"
    ).expect("metric creation failed");

    /// Publishes rejected before fan-out
    pub static ref REJECTED: IntGauge = IntGauge::new(
        "manifold_bus_rejected_envelopes",
        "Publishes rejected by middleware or for an unknown channel"
    ).expect("metric creation failed");

    /// Subscriber and transport failures
    pub static ref SUBSCRIBER_FAILURES: IntGauge = IntGauge::new(
        "manifold_bus_subscriber_failures",
        "Subscriber and transport errors or panics since start"
    ).expect("metric creation failed");

    /// Current metabolic pressure (0-100)
    pub static ref METABOLIC_PRESSURE: IntGauge = IntGauge::new(
        "manifold_bus_metabolic_pressure",
        "Current metabolic pressure score"
    ).expect("metric creation failed");

    /// Analyzer temperature (0-1)
    pub static ref TEMPERATURE: Gauge = Gauge::new(
        "manifold_analyzer_temperature",
        "Backpressure analyzer temperature"
    ).expect("metric creation failed");

    /// Records currently held by the event log
    pub static ref EVENT_LOG_SIZE: IntGauge = IntGauge::new(
        "manifold_event_log_records",
        "Records currently held by the event log"
    ).expect("metric creation failed");

    // =========================================================================
    // WORMHOLES
    // =========================================================================

    /// Envelopes forwarded across all wormholes
    pub static ref WORMHOLE_FORWARDED: IntGauge = IntGauge::new(
        "manifold_wormhole_forwarded_envelopes",
        "Envelopes forwarded across all wormholes since start"
    ).expect("metric creation failed");

    /// Envelopes dropped at offer time across all wormholes
    pub static ref WORMHOLE_DROPPED: IntGauge = IntGauge::new(
        "manifold_wormhole_dropped_envelopes",
        "Envelopes dropped for a full queue or the hop limit"
    ).expect("metric creation failed");

    /// Envelopes currently buffered across all wormholes
    pub static ref WORMHOLE_BUFFERED: IntGauge = IntGauge::new(
        "manifold_wormhole_buffered_envelopes",
        "Envelopes currently queued across all wormholes"
    ).expect("metric creation failed");
}

/// Proof that the metrics are registered.
#[derive(Debug, Clone, Copy)]
pub struct MetricsHandle {
    _private: (),
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once; already-registered metrics are skipped.
///
/// # Errors
///
/// `TelemetryError::MetricsInit` for any registration failure other than a
/// duplicate.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Publish pipeline
        Box::new(PUBLISH_ATTEMPTS.clone()),
        Box::new(MIDDLEWARE_DURATION.clone()),
        // Bus snapshot
        Box::new(PUBLISHED.clone()),
        Box::new(DELIVERED.clone()),
        Box::new(SHED.clone()),
        Box::new(REJECTED.clone()),
        Box::new(SUBSCRIBER_FAILURES.clone()),
        Box::new(METABOLIC_PRESSURE.clone()),
        Box::new(TEMPERATURE.clone()),
        Box::new(EVENT_LOG_SIZE.clone()),
        // Wormholes
        Box::new(WORMHOLE_FORWARDED.clone()),
        Box::new(WORMHOLE_DROPPED.clone()),
        Box::new(WORMHOLE_BUFFERED.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle { _private: () })
}

/// Encode all metrics in Prometheus text format.
///
/// # Errors
///
/// `TelemetryError::MetricsInit` if encoding fails.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}
