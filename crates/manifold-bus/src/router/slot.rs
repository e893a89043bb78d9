//! Per-wormhole runtime: bounded queue, counters, and the single worker
//! that drains it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use manifold_types::{now_millis, Envelope, EnvelopeId, WormholeId, MAX_HOPS};
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::diagnostics::{Diagnostics, RouterDiagnostic};
use super::wormhole::{OverflowPolicy, Wormhole, WormholeStats};

/// Bus entry point used by wormhole workers.
///
/// Forwarded envelopes re-enter at the fan-out stage: subscribers,
/// transports, other wormholes, and the log. Never middleware.
pub trait Reentry: Send + Sync {
    /// Deliver a forwarded envelope. Returns `false` if its channel is not
    /// registered.
    fn reenter(&self, envelope: Envelope) -> bool;
}

/// Outcome of offering an envelope to one wormhole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Offer {
    Enqueued,
    /// Admitted by evicting a queued envelope.
    Evicted(EnvelopeId),
    QueueFull,
    CycleDetected,
}

const RUNNING: u8 = 0;
const CLOSED: u8 = 1;

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
    forwarded: AtomicU64,
    failed: AtomicU64,
}

pub(crate) struct Slot {
    pub(crate) record: RwLock<Wormhole>,
    queue: Mutex<VecDeque<Envelope>>,
    counters: Counters,
    notify: Notify,
    mode: AtomicU8,
    /// Set while the worker holds a popped envelope.
    busy: AtomicBool,
    /// Bumped on every enqueue, pop, and completed forward.
    activity: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Slot {
    pub(crate) fn new(record: Wormhole) -> Arc<Self> {
        Arc::new(Self {
            record: RwLock::new(record),
            queue: Mutex::new(VecDeque::new()),
            counters: Counters::default(),
            notify: Notify::new(),
            mode: AtomicU8::new(RUNNING),
            busy: AtomicBool::new(false),
            activity: AtomicU64::new(0),
            worker: Mutex::new(None),
        })
    }

    pub(crate) fn id(&self) -> WormholeId {
        self.record.read().id
    }

    /// Offer an envelope that already passed the filter.
    pub(crate) fn offer(&self, envelope: &Envelope) -> Offer {
        if envelope.hop_count >= MAX_HOPS {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return Offer::CycleDetected;
        }

        let (capacity, policy) = {
            let record = self.record.read();
            (record.capacity, record.overflow)
        };

        let outcome = {
            let mut queue = self.queue.lock();
            if queue.len() < capacity {
                queue.push_back(envelope.clone());
                Offer::Enqueued
            } else {
                match Self::evict(&mut queue, policy, envelope) {
                    Some(victim) => {
                        queue.push_back(envelope.clone());
                        Offer::Evicted(victim)
                    }
                    None => Offer::QueueFull,
                }
            }
        };

        match outcome {
            Offer::Enqueued => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Offer::Evicted(_) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                self.counters.evicted.fetch_add(1, Ordering::Relaxed);
            }
            Offer::QueueFull | Offer::CycleDetected => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
        if matches!(outcome, Offer::Enqueued | Offer::Evicted(_)) {
            self.activity.fetch_add(1, Ordering::AcqRel);
            self.notify.notify_one();
        }
        outcome
    }

    /// Remove one queued envelope to make room, per policy.
    fn evict(
        queue: &mut VecDeque<Envelope>,
        policy: OverflowPolicy,
        incoming: &Envelope,
    ) -> Option<EnvelopeId> {
        match policy {
            OverflowPolicy::DropNewest => None,
            OverflowPolicy::DropOldest => queue.pop_front().map(|e| e.id),
            OverflowPolicy::DropLowestPriority => {
                // Oldest among the lowest priority goes first.
                let (index, lowest) = queue
                    .iter()
                    .enumerate()
                    .min_by_key(|(i, e)| (e.priority, *i))
                    .map(|(i, e)| (i, e.priority))?;
                if lowest < incoming.priority {
                    queue.remove(index).map(|e| e.id)
                } else {
                    None
                }
            }
        }
    }

    pub(crate) fn stats(&self) -> WormholeStats {
        WormholeStats {
            buffered: self.queue.lock().len(),
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
            forwarded: self.counters.forwarded.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn buffered(&self) -> usize {
        self.queue.lock().len()
    }

    /// Nothing queued and nothing being forwarded.
    pub(crate) fn is_idle(&self) -> bool {
        let queue = self.queue.lock();
        queue.is_empty() && !self.busy.load(Ordering::Acquire)
    }

    pub(crate) fn activity(&self) -> u64 {
        self.activity.load(Ordering::Acquire)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.mode.load(Ordering::Acquire) == CLOSED
    }

    /// Start the drain worker. Exactly one per slot.
    pub(crate) fn spawn_worker(
        self: &Arc<Self>,
        reentry: Weak<dyn Reentry>,
        diagnostics: Arc<Diagnostics>,
        priority_range: (u8, u8),
    ) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let slot = Arc::clone(self);
        *worker = Some(tokio::spawn(async move {
            slot.run(reentry, diagnostics, priority_range).await;
        }));
    }

    async fn run(
        self: Arc<Self>,
        reentry: Weak<dyn Reentry>,
        diagnostics: Arc<Diagnostics>,
        priority_range: (u8, u8),
    ) {
        loop {
            if self.mode.load(Ordering::Acquire) == CLOSED {
                break;
            }

            // Popping and marking busy happen under the queue lock, so an
            // idle check never sees an envelope in neither place.
            let next = {
                let mut queue = self.queue.lock();
                let next = queue.pop_front();
                if next.is_some() {
                    self.busy.store(true, Ordering::Release);
                    self.activity.fetch_add(1, Ordering::AcqRel);
                }
                next
            };
            let Some(envelope) = next else {
                self.notify.notified().await;
                continue;
            };

            let Some(bus) = reentry.upgrade() else {
                self.busy.store(false, Ordering::Release);
                debug!(wormhole = %self.id(), "Bus dropped, wormhole worker exiting");
                break;
            };
            self.forward(&envelope, bus.as_ref(), &diagnostics, priority_range);
            drop(bus);
            self.busy.store(false, Ordering::Release);
            self.activity.fetch_add(1, Ordering::AcqRel);

            tokio::task::yield_now().await;
        }
    }

    fn forward(
        &self,
        envelope: &Envelope,
        bus: &dyn Reentry,
        diagnostics: &Diagnostics,
        priority_range: (u8, u8),
    ) {
        let (id, to, transform) = {
            let record = self.record.read();
            (record.id, record.to.clone(), record.transform.clone())
        };

        let mut derived = envelope.forwarded(to.clone(), now_millis());
        if let Some(transform) = &transform {
            transform.apply(&mut derived, priority_range);
        }
        let derived_id = derived.id;
        let hop_count = derived.hop_count;

        if bus.reenter(derived) {
            self.counters.forwarded.fetch_add(1, Ordering::Relaxed);
            debug!(
                wormhole = %id,
                envelope_id = %derived_id,
                correlation_id = %envelope.correlation_id,
                to = %to,
                hop_count,
                "Envelope forwarded"
            );
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(wormhole = %id, to = %to, "Forward failed: destination channel unknown");
            diagnostics.push(RouterDiagnostic::ForwardFailed {
                wormhole: id,
                envelope_id: envelope.id,
                to,
                reason: "destination channel unknown".to_string(),
                at: now_millis(),
            });
        }
    }

    /// Stop the worker without draining. Returns the discarded count.
    pub(crate) fn close(&self) -> usize {
        self.mode.store(CLOSED, Ordering::Release);
        self.notify.notify_one();
        if let Some(worker) = self.worker.lock().take() {
            worker.abort();
        }
        let mut queue = self.queue.lock();
        let discarded = queue.len();
        queue.clear();
        discarded
    }
}
