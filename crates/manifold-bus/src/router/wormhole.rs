//! Wormhole definitions, patches, and stats snapshots.

use manifold_types::{ChannelId, Envelope, EventKind, Priority, WormholeId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::filter::WormholeFilter;

/// What to do with an offer when the buffer is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Reject the incoming item.
    #[default]
    DropNewest,
    /// Evict the oldest queued item to admit the incoming one.
    DropOldest,
    /// Evict the lowest-priority queued item if it is strictly lower than
    /// the incoming one; otherwise reject the incoming item.
    DropLowestPriority,
}

/// Rewrite applied to the derived envelope before it is republished.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WormholeTransform {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
    /// Object whose keys are merged over the payload. A non-object payload
    /// is replaced outright.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_payload: Option<Value>,
}

impl WormholeTransform {
    pub(crate) fn apply(&self, envelope: &mut Envelope, priority_range: (u8, u8)) {
        if let Some(kind) = &self.kind {
            envelope.kind = EventKind::parse(kind);
        }
        if let Some(priority) = self.priority {
            envelope.priority = Priority(priority).clamp_to(priority_range.0, priority_range.1);
        }
        if let Some(merge) = &self.merge_payload {
            match (&mut envelope.payload, merge) {
                (Value::Object(target), Value::Object(extra)) => {
                    for (key, value) in extra {
                        target.insert(key.clone(), value.clone());
                    }
                }
                (payload, merge) => *payload = merge.clone(),
            }
        }
    }
}

/// Caller-supplied definition for `create`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WormholeSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub from: ChannelId,
    pub to: ChannelId,
    #[serde(default)]
    pub filter: WormholeFilter,
    /// Buffer capacity; the bus default applies when absent.
    #[serde(default)]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub overflow: Option<OverflowPolicy>,
    #[serde(default)]
    pub transform: Option<WormholeTransform>,
    /// Defaults to `true`.
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl WormholeSpec {
    /// Enabled, unfiltered route with default capacity and policy.
    pub fn new(
        name: impl Into<String>,
        from: impl Into<ChannelId>,
        to: impl Into<ChannelId>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            from: from.into(),
            to: to.into(),
            filter: WormholeFilter::All,
            capacity: None,
            overflow: None,
            transform: None,
            enabled: None,
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn filter(mut self, filter: WormholeFilter) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    #[must_use]
    pub fn overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = Some(overflow);
        self
    }

    #[must_use]
    pub fn transform(mut self, transform: WormholeTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }
}

/// Partial update for `update`. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WormholePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub from: Option<ChannelId>,
    pub to: Option<ChannelId>,
    pub filter: Option<WormholeFilter>,
    pub capacity: Option<usize>,
    pub overflow: Option<OverflowPolicy>,
    /// `Some(None)` clears the transform; JSON `null` maps to it.
    #[serde(
        with = "::serde_with::rust::double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub transform: Option<Option<WormholeTransform>>,
    pub enabled: Option<bool>,
}

impl WormholePatch {
    #[must_use]
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }
}

/// Persisted wormhole definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wormhole {
    pub id: WormholeId,
    pub name: String,
    pub description: String,
    pub from: ChannelId,
    pub to: ChannelId,
    pub filter: WormholeFilter,
    pub capacity: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
    #[serde(default)]
    pub transform: Option<WormholeTransform>,
    pub enabled: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Wormhole {
    pub(crate) fn from_spec(spec: WormholeSpec, default_capacity: usize, now: u64) -> Self {
        Self {
            id: WormholeId::new(),
            name: spec.name,
            description: spec.description,
            from: spec.from,
            to: spec.to,
            filter: spec.filter,
            capacity: spec.capacity.unwrap_or(default_capacity),
            overflow: spec.overflow.unwrap_or_default(),
            transform: spec.transform,
            enabled: spec.enabled.unwrap_or(true),
            created_at: now,
            updated_at: now,
        }
    }

    pub(crate) fn apply_patch(&mut self, patch: WormholePatch, now: u64) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(from) = patch.from {
            self.from = from;
        }
        if let Some(to) = patch.to {
            self.to = to;
        }
        if let Some(filter) = patch.filter {
            self.filter = filter;
        }
        if let Some(capacity) = patch.capacity {
            self.capacity = capacity;
        }
        if let Some(overflow) = patch.overflow {
            self.overflow = overflow;
        }
        if let Some(transform) = patch.transform {
            self.transform = transform;
        }
        if let Some(enabled) = patch.enabled {
            self.enabled = enabled;
        }
        self.updated_at = now;
    }
}

/// Lifetime counters for one wormhole.
///
/// `enqueued + dropped` equals the number of offers. `evicted` items were
/// admitted and later displaced, so they are already part of `enqueued`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WormholeStats {
    /// Items currently queued.
    pub buffered: usize,
    pub enqueued: u64,
    pub dropped: u64,
    pub evicted: u64,
    pub forwarded: u64,
    /// Forwards that failed because the destination was gone.
    pub failed: u64,
}

impl WormholeStats {
    /// Offers seen so far.
    #[must_use]
    pub fn offered(&self) -> u64 {
        self.enqueued + self.dropped
    }
}

/// Copy of a wormhole and its stats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WormholeStatus {
    pub wormhole: Wormhole,
    pub stats: WormholeStats,
}
