//! # Event Log
//!
//! Bounded record of delivered envelopes, newest at the head.
//!
//! - `append` inserts at the head and silently trims the oldest entries
//!   beyond capacity.
//! - `mark_handled` is idempotent and never errors, including for unknown ids.
//! - Persistence goes through an injectable [`Store`]; `flush` only saves
//!   when something changed since the last save.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use manifold_types::{Envelope, EnvelopeId, StoreError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::analyzer::AnalyzerSnapshot;
use crate::store::Store;

/// Immutable copy of a delivered envelope plus the analyzer reading taken
/// when it was logged. Only `envelope.handled` ever changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogRecord {
    pub envelope: Envelope,
    pub snapshot: AnalyzerSnapshot,
    /// Unix milliseconds.
    pub recorded_at: u64,
}

/// Store holding the persisted log, newest first.
pub type LogStore = Arc<dyn Store<Vec<EventLogRecord>>>;

/// Capped ring of [`EventLogRecord`]s.
pub struct EventLog {
    /// Front is newest.
    records: RwLock<VecDeque<EventLogRecord>>,
    capacity: usize,
    store: LogStore,
    dirty: AtomicBool,
}

impl EventLog {
    pub fn new(capacity: usize, store: LogStore) -> Self {
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity: capacity.max(1),
            store,
            dirty: AtomicBool::new(false),
        }
    }

    /// Insert at the head, trimming the tail past capacity.
    pub fn append(&self, record: EventLogRecord) {
        let mut records = self.records.write();
        if records.iter().any(|r| r.envelope.id == record.envelope.id) {
            debug!(envelope_id = %record.envelope.id, "Envelope already logged");
            return;
        }
        records.push_front(record);
        records.truncate(self.capacity);
        self.dirty.store(true, Ordering::Release);
    }

    /// Up to `limit` records, newest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<EventLogRecord> {
        self.records.read().iter().take(limit).cloned().collect()
    }

    #[must_use]
    pub fn by_id(&self, id: EnvelopeId) -> Option<EventLogRecord> {
        self.records
            .read()
            .iter()
            .find(|r| r.envelope.id == id)
            .cloned()
    }

    /// Mark a logged envelope handled. Returns `true` only if this call
    /// changed it; already-handled and unknown ids are no-ops.
    pub fn mark_handled(&self, id: EnvelopeId) -> bool {
        let mut records = self.records.write();
        let changed = records
            .iter_mut()
            .find(|r| r.envelope.id == id)
            .is_some_and(|r| r.envelope.mark_handled());
        if changed {
            self.dirty.store(true, Ordering::Release);
        }
        changed
    }

    /// Up to `limit` unhandled records, newest first.
    #[must_use]
    pub fn unhandled(&self, limit: usize) -> Vec<EventLogRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| !r.envelope.is_handled())
            .take(limit)
            .cloned()
            .collect()
    }

    /// The newest `limit` unhandled records, oldest first, ready to replay.
    #[must_use]
    pub fn replay_candidates(&self, limit: usize) -> Vec<EventLogRecord> {
        let mut candidates = self.unhandled(limit);
        candidates.reverse();
        candidates
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Save through the store if anything changed. Returns whether a save
    /// happened.
    ///
    /// # Errors
    ///
    /// Propagates the store error; the log stays dirty so the next flush
    /// retries.
    pub async fn flush(&self) -> Result<bool, StoreError> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(false);
        }
        let snapshot: Vec<EventLogRecord> = self.records.read().iter().cloned().collect();
        if let Err(e) = self.store.save(&snapshot).await {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        debug!(records = snapshot.len(), "Event log flushed");
        Ok(true)
    }

    /// Replace the in-memory log with the persisted one.
    ///
    /// # Errors
    ///
    /// Propagates the store error.
    pub async fn restore(&self) -> Result<usize, StoreError> {
        let Some(persisted) = self.store.load().await? else {
            return Ok(0);
        };
        let mut records = self.records.write();
        records.clear();
        records.extend(persisted.into_iter().take(self.capacity));
        info!(records = records.len(), "Event log restored");
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use manifold_types::{ChannelId, CorrelationId, EventKind, Priority};
    use serde_json::json;

    fn record(n: u64) -> EventLogRecord {
        EventLogRecord {
            envelope: Envelope::new(
                EventKind::parse("Audit.EntryRecorded"),
                ChannelId::from("AUDIT_LOG"),
                Priority(2),
                json!({ "n": n }),
                "gut".into(),
                CorrelationId::new(),
                n,
            ),
            snapshot: AnalyzerSnapshot::default(),
            recorded_at: n,
        }
    }

    fn log(capacity: usize) -> EventLog {
        EventLog::new(capacity, Arc::new(MemoryStore::<Vec<EventLogRecord>>::new()))
    }

    #[test]
    fn test_ring_trims_oldest() {
        let log = log(3);
        let records: Vec<_> = (0..5).map(record).collect();
        for r in &records {
            log.append(r.clone());
        }

        assert_eq!(log.len(), 3);
        let recent = log.recent(10);
        assert_eq!(recent[0].envelope.id, records[4].envelope.id);
        assert_eq!(recent[2].envelope.id, records[2].envelope.id);
        assert!(log.by_id(records[0].envelope.id).is_none());
    }

    #[test]
    fn test_mark_handled_is_idempotent() {
        let log = log(10);
        let r = record(1);
        let id = r.envelope.id;
        log.append(r);

        assert!(log.mark_handled(id));
        assert!(!log.mark_handled(id));
        assert!(!log.mark_handled(EnvelopeId::new()));

        assert_eq!(log.len(), 1);
        assert!(log.by_id(id).unwrap().envelope.is_handled());
    }

    #[test]
    fn test_duplicate_append_ignored() {
        let log = log(10);
        let r = record(1);
        log.append(r.clone());
        log.append(r);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_replay_candidates_oldest_first() {
        let log = log(10);
        let records: Vec<_> = (0..4).map(record).collect();
        for r in &records {
            log.append(r.clone());
        }
        log.mark_handled(records[3].envelope.id);

        let candidates = log.replay_candidates(2);
        let ids: Vec<_> = candidates.iter().map(|r| r.envelope.id).collect();
        assert_eq!(ids, vec![records[1].envelope.id, records[2].envelope.id]);
    }

    #[tokio::test]
    async fn test_flush_only_when_dirty_and_restore() {
        let store = Arc::new(MemoryStore::<Vec<EventLogRecord>>::new());
        let log = EventLog::new(10, store.clone());

        assert!(!log.flush().await.unwrap());
        log.append(record(1));
        log.append(record(2));
        assert!(log.flush().await.unwrap());
        assert!(!log.flush().await.unwrap());

        let restored = EventLog::new(1, store);
        assert_eq!(restored.restore().await.unwrap(), 1);
        assert_eq!(restored.recent(1)[0].recorded_at, 2);
    }
}
