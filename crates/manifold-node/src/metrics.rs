//! Bridges bus activity into the Prometheus registry.
//!
//! - [`MetricsMiddleware`] counts publishes and times the rest of the chain.
//! - [`install_stats_export`] mirrors `BusStats` and router totals into
//!   gauges on the bus scheduler.

use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use manifold_bus::{Bus, Middleware, Next};
use manifold_telemetry::metrics::{
    DELIVERED, EVENT_LOG_SIZE, METABOLIC_PRESSURE, MIDDLEWARE_DURATION, PUBLISHED,
    PUBLISH_ATTEMPTS, REJECTED, SHED, SUBSCRIBER_FAILURES, TEMPERATURE, WORMHOLE_BUFFERED,
    WORMHOLE_DROPPED, WORMHOLE_FORWARDED,
};
use manifold_telemetry::{metric_inc, HistogramTimer};
use manifold_types::Envelope;

/// Outermost middleware: counts every publish attempt.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsMiddleware;

#[async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn handle(&self, envelope: &mut Envelope, next: Next<'_>) -> anyhow::Result<()> {
        metric_inc!(
            PUBLISH_ATTEMPTS,
            &[envelope.channel_id.as_str(), envelope.kind.as_str()]
        );
        let _timer = HistogramTimer::new(&MIDDLEWARE_DURATION);
        next.run(envelope).await
    }
}

/// Copy the current bus state into the gauges.
pub fn export_stats(bus: &Bus) {
    let stats = bus.stats();
    PUBLISHED.set(saturate(stats.published));
    DELIVERED.set(saturate(stats.delivered));
    SHED.set(saturate(stats.shed));
    REJECTED.set(saturate(stats.rejected));
    SUBSCRIBER_FAILURES.set(saturate(stats.subscriber_failures));
    METABOLIC_PRESSURE.set(i64::from(stats.metabolic_pressure));

    TEMPERATURE.set(bus.analyze(None).temperature);
    EVENT_LOG_SIZE.set(saturate(bus.log().len() as u64));

    let totals = bus.wormholes().totals();
    WORMHOLE_FORWARDED.set(saturate(totals.forwarded));
    WORMHOLE_DROPPED.set(saturate(totals.dropped));
    WORMHOLE_BUFFERED.set(saturate(totals.buffered as u64));
}

/// Register the `metrics.export` job on the bus scheduler.
pub fn install_stats_export(bus: &Bus, period: Duration) {
    let weak = bus.downgrade();
    bus.scheduler().every("metrics.export", period, move || {
        let weak = weak.clone();
        async move {
            if let Some(bus) = weak.upgrade() {
                export_stats(&bus);
            }
        }
        .boxed()
    });
}

fn saturate(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
