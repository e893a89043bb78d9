//! # Wormhole Router
//!
//! Directed, filtered, buffered routes between channels.
//!
//! ## Flow
//!
//! ```text
//! publish ─► fan-out ─► offer() ─► [filter] ─► bounded queue ─► worker ─► reenter(to)
//!                                     │              │
//!                                 no match      full / hop limit
//!                                  (skip)      (dropped + diagnostic)
//! ```
//!
//! ## Guarantees
//!
//! - One worker per wormhole, so dequeues within a wormhole never overlap.
//! - Independent wormholes drain concurrently.
//! - `enqueued + dropped` equals the offers a wormhole has seen.
//! - Envelopes at `MAX_HOPS` are never forwarded.
//! - Every CRUD call persists the full definition list; CRUD calls are
//!   serialised through one async mutex so saves never interleave.

mod diagnostics;
mod filter;
mod slot;
mod wormhole;

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use manifold_types::{now_millis, BusError, Envelope, WormholeId};
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::BusConfig;
use crate::registry::ChannelRegistry;
use crate::store::Store;

pub use diagnostics::RouterDiagnostic;
pub use filter::WormholeFilter;
pub use slot::Reentry;
pub use wormhole::{
    OverflowPolicy, Wormhole, WormholePatch, WormholeSpec, WormholeStats, WormholeStatus,
    WormholeTransform,
};

use diagnostics::Diagnostics;
use slot::{Offer, Slot};

const DRAIN_POLL: Duration = Duration::from_millis(5);

/// Store holding the persisted wormhole definitions.
pub type WormholeStore = Arc<dyn Store<Vec<Wormhole>>>;

/// Registry and runtime of all wormholes.
pub struct WormholeRouter {
    slots: RwLock<HashMap<WormholeId, Arc<Slot>>>,
    channels: Arc<ChannelRegistry>,
    reentry: Weak<dyn Reentry>,
    store: WormholeStore,
    /// Serialises CRUD so each save sees the previous one.
    writer: tokio::sync::Mutex<()>,
    diagnostics: Arc<Diagnostics>,
    default_capacity: usize,
    priority_range: (u8, u8),
}

impl WormholeRouter {
    pub fn new(
        channels: Arc<ChannelRegistry>,
        reentry: Weak<dyn Reentry>,
        store: WormholeStore,
        config: &BusConfig,
    ) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            channels,
            reentry,
            store,
            writer: tokio::sync::Mutex::new(()),
            diagnostics: Arc::new(Diagnostics::new(config.diagnostics_capacity)),
            default_capacity: config.default_wormhole_capacity,
            priority_range: (config.priority_min, config.priority_max),
        }
    }

    // =========================================================================
    // CRUD
    // =========================================================================

    /// Load persisted wormholes and start their workers.
    ///
    /// Restored definitions skip channel validation; channels are usually
    /// registered after the router comes up.
    ///
    /// # Errors
    ///
    /// `BusError::Store` if loading fails.
    pub async fn restore(&self) -> Result<usize, BusError> {
        let _writer = self.writer.lock().await;
        let Some(records) = self.store.load().await? else {
            return Ok(0);
        };

        let mut restored = 0;
        for record in records {
            if record.capacity == 0 {
                warn!(wormhole = %record.id, name = %record.name, "Skipping persisted wormhole with zero capacity");
                continue;
            }
            let slot = self.start(record);
            let replaced = self.slots.write().insert(slot.id(), slot);
            if let Some(old) = replaced {
                let discarded = old.close();
                debug!(wormhole = %old.id(), discarded, "Running wormhole replaced by restore");
            }
            restored += 1;
        }
        info!(count = restored, "Wormholes restored");
        Ok(restored)
    }

    /// Create a wormhole and start its worker.
    ///
    /// # Errors
    ///
    /// - `BusError::InvalidWormhole` for an empty name or zero capacity
    /// - `BusError::UnknownChannel` if `from` or `to` is not registered
    /// - `BusError::Store` if persisting fails (nothing is created)
    pub async fn create(&self, spec: WormholeSpec) -> Result<Wormhole, BusError> {
        let _writer = self.writer.lock().await;
        let wormhole = Wormhole::from_spec(spec, self.default_capacity, now_millis());
        self.validate(&wormhole)?;

        let mut records = self.records();
        records.push(wormhole.clone());
        self.store.save(&records).await?;

        let slot = self.start(wormhole.clone());
        self.slots.write().insert(wormhole.id, slot);
        info!(
            wormhole = %wormhole.id,
            name = %wormhole.name,
            from = %wormhole.from,
            to = %wormhole.to,
            capacity = wormhole.capacity,
            "Wormhole created"
        );
        Ok(wormhole)
    }

    /// Apply a patch. Capacity changes apply from the next offer.
    ///
    /// # Errors
    ///
    /// `BusError::UnknownWormhole`, plus the validation and store errors of
    /// [`WormholeRouter::create`].
    pub async fn update(&self, id: WormholeId, patch: WormholePatch) -> Result<Wormhole, BusError> {
        let _writer = self.writer.lock().await;
        let slot = self.slot(id)?;

        let mut updated = slot.record.read().clone();
        updated.apply_patch(patch, now_millis());
        self.validate(&updated)?;

        let records: Vec<Wormhole> = self
            .records()
            .into_iter()
            .map(|r| if r.id == id { updated.clone() } else { r })
            .collect();
        self.store.save(&records).await?;

        *slot.record.write() = updated.clone();
        info!(wormhole = %id, enabled = updated.enabled, "Wormhole updated");
        Ok(updated)
    }

    /// Delete a wormhole. Queued envelopes are discarded.
    ///
    /// # Errors
    ///
    /// `BusError::UnknownWormhole` or `BusError::Store`.
    pub async fn delete(&self, id: WormholeId) -> Result<Wormhole, BusError> {
        let _writer = self.writer.lock().await;
        let slot = self.slot(id)?;

        let records: Vec<Wormhole> = self.records().into_iter().filter(|r| r.id != id).collect();
        self.store.save(&records).await?;

        self.slots.write().remove(&id);
        let discarded = slot.close();
        let record = slot.record.read().clone();
        info!(wormhole = %id, name = %record.name, discarded, "Wormhole deleted");
        Ok(record)
    }

    /// Copies of every wormhole with stats, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<WormholeStatus> {
        let mut statuses: Vec<WormholeStatus> = self
            .slots
            .read()
            .values()
            .map(|slot| WormholeStatus {
                wormhole: slot.record.read().clone(),
                stats: slot.stats(),
            })
            .collect();
        statuses.sort_by_key(|s| (s.wormhole.created_at, s.wormhole.id));
        statuses
    }

    #[must_use]
    pub fn get(&self, id: WormholeId) -> Option<WormholeStatus> {
        let slot = self.slots.read().get(&id).cloned()?;
        let wormhole = slot.record.read().clone();
        Some(WormholeStatus {
            wormhole,
            stats: slot.stats(),
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Stats summed over every wormhole.
    #[must_use]
    pub fn totals(&self) -> WormholeStats {
        self.slots
            .read()
            .values()
            .map(|s| s.stats())
            .fold(WormholeStats::default(), |acc, s| WormholeStats {
                buffered: acc.buffered + s.buffered,
                enqueued: acc.enqueued + s.enqueued,
                dropped: acc.dropped + s.dropped,
                evicted: acc.evicted + s.evicted,
                forwarded: acc.forwarded + s.forwarded,
                failed: acc.failed + s.failed,
            })
    }

    /// Recent diagnostics, newest first.
    #[must_use]
    pub fn diagnostics(&self, limit: usize) -> Vec<RouterDiagnostic> {
        self.diagnostics.recent(limit)
    }

    // =========================================================================
    // ROUTING
    // =========================================================================

    /// Offer a delivered envelope to every enabled wormhole leaving its
    /// channel. Returns how many wormholes matched.
    pub(crate) fn offer(&self, envelope: &Envelope) -> usize {
        let matching: Vec<Arc<Slot>> = self
            .slots
            .read()
            .values()
            .filter(|slot| {
                let record = slot.record.read();
                record.enabled
                    && record.from == envelope.channel_id
                    && record.filter.matches(envelope)
            })
            .cloned()
            .collect();

        for slot in &matching {
            let wormhole = slot.id();
            match slot.offer(envelope) {
                Offer::Enqueued => {}
                Offer::Evicted(victim) => {
                    debug!(wormhole = %wormhole, evicted = %victim, "Queued envelope evicted");
                }
                Offer::QueueFull => {
                    let policy = slot.record.read().overflow;
                    debug!(wormhole = %wormhole, envelope_id = %envelope.id, "Wormhole queue full, envelope dropped");
                    self.diagnostics.push(RouterDiagnostic::QueueFull {
                        wormhole,
                        envelope_id: envelope.id,
                        policy,
                        at: now_millis(),
                    });
                }
                Offer::CycleDetected => {
                    warn!(
                        wormhole = %wormhole,
                        correlation_id = %envelope.correlation_id,
                        hop_count = envelope.hop_count,
                        "Cycle detected, envelope not forwarded"
                    );
                    self.diagnostics.push(RouterDiagnostic::CycleDetected {
                        wormhole,
                        envelope_id: envelope.id,
                        correlation_id: envelope.correlation_id,
                        hop_count: envelope.hop_count,
                        at: now_millis(),
                    });
                }
            }
        }
        matching.len()
    }

    /// Drain every queue for up to `timeout`, then stop all workers.
    /// Returns the number of envelopes discarded.
    ///
    /// Workers keep running until the router as a whole is quiet, so a
    /// chain of wormholes drains end to end.
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        let quiet = tokio::time::timeout(timeout, self.quiesce()).await.is_ok();
        debug!(quiet, "Wormhole drain finished");

        let slots: Vec<Arc<Slot>> = self.slots.read().values().cloned().collect();
        let discarded: usize = slots.iter().map(|s| s.close()).sum();
        if discarded > 0 {
            warn!(discarded, timeout_ms = timeout.as_millis() as u64, "Wormhole queues not drained before shutdown, envelopes discarded");
        } else {
            info!(wormholes = slots.len(), "Wormhole queues drained");
        }
        discarded
    }

    /// Resolves once every slot is idle and no slot saw activity during the
    /// check.
    async fn quiesce(&self) {
        loop {
            let slots: Vec<Arc<Slot>> = self.slots.read().values().cloned().collect();
            let before: u64 = slots.iter().map(|s| s.activity()).sum();
            let idle = slots.iter().all(|s| s.is_idle());
            let after: u64 = slots.iter().map(|s| s.activity()).sum();
            if idle && before == after {
                return;
            }
            tokio::time::sleep(DRAIN_POLL).await;
        }
    }

    /// Stop every worker immediately, discarding queued envelopes.
    pub(crate) fn abort_all(&self) -> usize {
        self.slots.read().values().map(|s| s.close()).sum()
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn start(&self, record: Wormhole) -> Arc<Slot> {
        let slot = Slot::new(record);
        slot.spawn_worker(
            self.reentry.clone(),
            Arc::clone(&self.diagnostics),
            self.priority_range,
        );
        slot
    }

    fn slot(&self, id: WormholeId) -> Result<Arc<Slot>, BusError> {
        self.slots
            .read()
            .get(&id)
            .cloned()
            .ok_or(BusError::UnknownWormhole(id))
    }

    fn records(&self) -> Vec<Wormhole> {
        let mut records: Vec<Wormhole> = self
            .slots
            .read()
            .values()
            .map(|s| s.record.read().clone())
            .collect();
        records.sort_by_key(|r| (r.created_at, r.id));
        records
    }

    fn validate(&self, wormhole: &Wormhole) -> Result<(), BusError> {
        if wormhole.name.trim().is_empty() {
            return Err(BusError::InvalidWormhole("name must not be empty".into()));
        }
        if wormhole.capacity == 0 {
            return Err(BusError::InvalidWormhole("capacity must be at least 1".into()));
        }
        for channel in [&wormhole.from, &wormhole.to] {
            if !self.channels.contains(channel) {
                return Err(BusError::UnknownChannel(channel.clone()));
            }
        }
        Ok(())
    }
}
