//! Pluggable outbound sinks.
//!
//! A transport sees every envelope the bus delivers, after subscribers are
//! dispatched. Failures are isolated exactly like subscriber failures.

use std::sync::Arc;

use async_trait::async_trait;
use manifold_types::Envelope;
use tracing::info;

/// Outbound sink for delivered envelopes.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, envelope: Arc<Envelope>) -> anyhow::Result<()>;
}

/// Writes every delivered envelope to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTransport;

#[async_trait]
impl Transport for TracingTransport {
    fn name(&self) -> &str {
        "tracing"
    }

    async fn send(&self, envelope: Arc<Envelope>) -> anyhow::Result<()> {
        info!(
            target: "manifold::events",
            envelope_id = %envelope.id,
            kind = %envelope.kind,
            channel = %envelope.channel_id,
            priority = envelope.priority.value(),
            correlation_id = %envelope.correlation_id,
            hop_count = envelope.hop_count,
            source = %envelope.source,
            "Event delivered"
        );
        Ok(())
    }
}
