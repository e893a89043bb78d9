//! Bounded ring of router diagnostics.
//!
//! Routing is best-effort, so failures past fan-out never reach the
//! publisher. They land here and in the wormhole stats instead.

use std::collections::VecDeque;

use manifold_types::{ChannelId, CorrelationId, EnvelopeId, WormholeId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::wormhole::OverflowPolicy;

/// A routing event worth surfacing to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RouterDiagnostic {
    /// Hop limit reached; the envelope was not forwarded.
    CycleDetected {
        wormhole: WormholeId,
        envelope_id: EnvelopeId,
        correlation_id: CorrelationId,
        hop_count: u32,
        at: u64,
    },
    /// Buffer full and the policy rejected the incoming envelope.
    QueueFull {
        wormhole: WormholeId,
        envelope_id: EnvelopeId,
        policy: OverflowPolicy,
        at: u64,
    },
    /// The destination channel disappeared.
    ForwardFailed {
        wormhole: WormholeId,
        envelope_id: EnvelopeId,
        to: ChannelId,
        reason: String,
        at: u64,
    },
}

impl RouterDiagnostic {
    #[must_use]
    pub fn wormhole(&self) -> WormholeId {
        match self {
            Self::CycleDetected { wormhole, .. }
            | Self::QueueFull { wormhole, .. }
            | Self::ForwardFailed { wormhole, .. } => *wormhole,
        }
    }
}

pub(crate) struct Diagnostics {
    entries: Mutex<VecDeque<RouterDiagnostic>>,
    capacity: usize,
}

impl Diagnostics {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn push(&self, diagnostic: RouterDiagnostic) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(diagnostic);
    }

    /// Newest first.
    pub(crate) fn recent(&self, limit: usize) -> Vec<RouterDiagnostic> {
        self.entries.lock().iter().rev().take(limit).cloned().collect()
    }
}
