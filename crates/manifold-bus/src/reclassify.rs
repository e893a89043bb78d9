//! Downgrades error-kind envelopes to low-priority `System.Info` when the
//! bus runs hot.
//!
//! The republish is a derived publish: it passes the middleware chain,
//! keeps the original lineage, and is refused once the lineage reaches the
//! hop limit, so a reclassifier listening on its own target channel cannot
//! loop.

use std::sync::Arc;

use async_trait::async_trait;
use manifold_types::{BusError, ChannelId, Envelope, EventKind, PublishRequest, SystemKind};
use serde_json::json;
use tracing::{debug, info};

use crate::bus::{Bus, WeakBus};
use crate::subscriber::{Subscriber, Subscription};

/// Source stamped on reclassified envelopes.
pub const RECLASSIFIER_SOURCE: &str = "reclassifier";

/// Subscriber that republishes error kinds above a temperature threshold.
pub struct Reclassifier {
    bus: WeakBus,
    threshold: f64,
    target: ChannelId,
}

impl Reclassifier {
    /// `threshold` is an analyzer temperature in `[0, 1]`.
    #[must_use]
    pub fn new(bus: &Bus, threshold: f64, target: impl Into<ChannelId>) -> Self {
        Self {
            bus: bus.downgrade(),
            threshold: threshold.clamp(0.0, 1.0),
            target: target.into(),
        }
    }

    /// Subscribe to `channel` on the bus this reclassifier was built for.
    ///
    /// # Errors
    ///
    /// `BusError::UnknownChannel` if `channel` is not registered, or
    /// `BusError::ShuttingDown` if the bus is gone.
    pub fn attach(self, channel: impl Into<ChannelId>) -> Result<Subscription, BusError> {
        let bus = self.bus.upgrade().ok_or(BusError::ShuttingDown)?;
        bus.subscribe(channel, Arc::new(self))
    }

    #[must_use]
    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

#[async_trait]
impl Subscriber for Reclassifier {
    fn name(&self) -> &str {
        RECLASSIFIER_SOURCE
    }

    async fn handle(&self, envelope: Arc<Envelope>) -> anyhow::Result<()> {
        if !envelope.kind.is_error() {
            return Ok(());
        }
        let Some(bus) = self.bus.upgrade() else {
            return Ok(());
        };

        let temperature = bus.analyze(Some(&envelope)).temperature;
        if temperature < self.threshold {
            return Ok(());
        }

        let request = PublishRequest::new(
            EventKind::System(SystemKind::Info),
            self.target.clone(),
            json!({
                "reclassified_from": envelope.kind.as_str(),
                "original_id": envelope.id,
                "payload": envelope.payload,
            }),
        )
        .priority(bus.config().priority_min)
        .source(RECLASSIFIER_SOURCE);

        match bus.publish_derived(&envelope, request).await {
            Ok(receipt) => {
                bus.log().mark_handled(envelope.id);
                info!(
                    original_id = %envelope.id,
                    reclassified_id = %receipt.id,
                    kind = %envelope.kind,
                    temperature,
                    "Error envelope reclassified"
                );
                Ok(())
            }
            Err(BusError::CycleDetected { hop_count, .. }) => {
                debug!(original_id = %envelope.id, hop_count, "Reclassification skipped at hop limit");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
