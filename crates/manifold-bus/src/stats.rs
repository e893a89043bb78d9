//! Bus-wide counters.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use manifold_types::Envelope;
use parking_lot::Mutex;
use serde::Serialize;

/// Copy of the bus counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    /// Publishes accepted past middleware and not shed.
    pub published: u64,
    /// Envelopes fanned out, wormhole forwards included.
    pub delivered: u64,
    /// Envelopes shed under metabolic pressure.
    pub shed: u64,
    /// Publishes rejected by middleware or for an unknown channel.
    pub rejected: u64,
    /// Subscriber and transport errors or panics.
    pub subscriber_failures: u64,
    /// Envelopes re-delivered by `replay`.
    pub replayed: u64,
    /// Published envelopes skipped at fan-out because `sampled` was off.
    pub unsampled: u64,
    pub by_channel: BTreeMap<String, u64>,
    pub by_kind: BTreeMap<String, u64>,
    pub by_priority: BTreeMap<u8, u64>,
    /// 0..=100.
    pub metabolic_pressure: u8,
}

#[derive(Default)]
struct Breakdown {
    by_channel: HashMap<String, u64>,
    by_kind: HashMap<String, u64>,
    by_priority: HashMap<u8, u64>,
}

#[derive(Default)]
pub(crate) struct StatsCollector {
    published: AtomicU64,
    delivered: AtomicU64,
    shed: AtomicU64,
    rejected: AtomicU64,
    subscriber_failures: AtomicU64,
    replayed: AtomicU64,
    unsampled: AtomicU64,
    pressure: AtomicU8,
    breakdown: Mutex<Breakdown>,
}

impl StatsCollector {
    pub(crate) fn record_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_shed(&self) {
        self.shed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_subscriber_failure(&self) {
        self.subscriber_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unsampled(&self) {
        self.unsampled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_replayed(&self, count: usize) {
        self.replayed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_delivery(&self, envelope: &Envelope) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        let mut breakdown = self.breakdown.lock();
        *breakdown
            .by_channel
            .entry(envelope.channel_id.to_string())
            .or_default() += 1;
        *breakdown
            .by_kind
            .entry(envelope.kind.as_str().to_string())
            .or_default() += 1;
        *breakdown
            .by_priority
            .entry(envelope.priority.value())
            .or_default() += 1;
    }

    pub(crate) fn pressure(&self) -> u8 {
        self.pressure.load(Ordering::Relaxed)
    }

    pub(crate) fn set_pressure(&self, pressure: u8) {
        self.pressure.store(pressure, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BusStats {
        let breakdown = self.breakdown.lock();
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            shed: self.shed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            subscriber_failures: self.subscriber_failures.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            unsampled: self.unsampled.load(Ordering::Relaxed),
            by_channel: breakdown.by_channel.clone().into_iter().collect(),
            by_kind: breakdown.by_kind.clone().into_iter().collect(),
            by_priority: breakdown.by_priority.clone().into_iter().collect(),
            metabolic_pressure: self.pressure(),
        }
    }
}
