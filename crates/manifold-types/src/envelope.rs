//! # Envelope
//!
//! The canonical message unit flowing through the bus.
//!
//! ## Lifecycle
//!
//! - Created by the bus at publish time from a [`PublishRequest`].
//! - Immutable afterwards, except for `handled` (false -> true only).
//! - Wormhole forwards produce a new envelope via [`Envelope::forwarded`]:
//!   new `id`, same `correlation_id`, `hop_count + 1`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ChannelId, CorrelationId, EnvelopeId};
use crate::kind::EventKind;

/// Urgency of an envelope. Higher is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    /// Clamp into the closed range `[min, max]`.
    #[must_use]
    pub fn clamp_to(self, min: u8, max: u8) -> Self {
        Self(self.0.clamp(min, max))
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.0
    }
}

impl From<u8> for Priority {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

/// A published message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: EnvelopeId,
    pub kind: EventKind,
    pub channel_id: ChannelId,
    pub priority: Priority,
    /// Opaque to the bus.
    pub payload: Value,
    pub source: String,
    pub correlation_id: CorrelationId,
    pub hop_count: u32,
    /// Unix milliseconds.
    pub timestamp: u64,
    /// `false` suppresses fan-out; middleware may clear it to sample traffic.
    #[serde(default = "sampled_by_default")]
    pub sampled: bool,
    #[serde(default)]
    handled: bool,
}

fn sampled_by_default() -> bool {
    true
}

impl Envelope {
    /// Source used when a publisher does not name itself.
    pub const ANONYMOUS_SOURCE: &'static str = "anonymous";

    /// Build a fresh, unforwarded envelope.
    pub fn new(
        kind: EventKind,
        channel_id: ChannelId,
        priority: Priority,
        payload: Value,
        source: String,
        correlation_id: CorrelationId,
        timestamp: u64,
    ) -> Self {
        Self {
            id: EnvelopeId::new(),
            kind,
            channel_id,
            priority,
            payload,
            source,
            correlation_id,
            hop_count: 0,
            timestamp,
            sampled: true,
            handled: false,
        }
    }

    /// Derive the envelope a wormhole republishes onto `to`.
    ///
    /// The derivative keeps kind, payload, priority, source, and correlation
    /// id; it gets a new id, a fresh timestamp, and `hop_count + 1`.
    #[must_use]
    pub fn forwarded(&self, to: ChannelId, timestamp: u64) -> Self {
        Self {
            id: EnvelopeId::new(),
            kind: self.kind.clone(),
            channel_id: to,
            priority: self.priority,
            payload: self.payload.clone(),
            source: self.source.clone(),
            correlation_id: self.correlation_id,
            hop_count: self.hop_count.saturating_add(1),
            timestamp,
            sampled: self.sampled,
            handled: false,
        }
    }

    #[must_use]
    pub fn is_handled(&self) -> bool {
        self.handled
    }

    /// Mark as handled. Returns `true` if this call changed the flag.
    pub fn mark_handled(&mut self) -> bool {
        let changed = !self.handled;
        self.handled = true;
        changed
    }
}

/// Caller-facing publish request.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    pub kind: EventKind,
    pub channel_id: ChannelId,
    pub payload: Value,
    pub priority: Option<Priority>,
    pub correlation_id: Option<CorrelationId>,
    pub source: Option<String>,
    pub sampled: bool,
}

impl PublishRequest {
    /// Minimal request: kind, channel, and payload.
    pub fn new(kind: impl Into<EventKind>, channel_id: impl Into<ChannelId>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            channel_id: channel_id.into(),
            payload,
            priority: None,
            correlation_id: None,
            source: None,
            sampled: true,
        }
    }

    #[must_use]
    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = Some(Priority(priority));
        self
    }

    #[must_use]
    pub fn correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    #[must_use]
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// An unsampled envelope passes middleware and shedding but is not
    /// fanned out, logged, or routed.
    #[must_use]
    pub fn sampled(mut self, sampled: bool) -> Self {
        self.sampled = sampled;
        self
    }
}

/// Result of a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub id: EnvelopeId,
    pub correlation_id: CorrelationId,
    /// `false` when the envelope passed middleware but was shed under
    /// metabolic pressure.
    pub accepted: bool,
}
