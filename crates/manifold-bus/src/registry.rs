//! # Channel Registry
//!
//! Named topics and their ordered subscriber lists.
//!
//! The registry is only mutated through its methods; every read hands out
//! copies so a concurrent `register`/`subscribe` can never produce a torn
//! view for a dispatcher.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use manifold_types::{BusError, Channel, ChannelId};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::subscriber::{Subscriber, SubscriptionTarget};

type Handler = (u64, Arc<dyn Subscriber>);

struct ChannelEntry {
    channel: Channel,
    /// Registration order.
    subscribers: Vec<Handler>,
}

/// Registry of channels and subscribers.
pub struct ChannelRegistry {
    channels: RwLock<HashMap<ChannelId, ChannelEntry>>,
    /// Subscribers attached to every channel.
    global: RwLock<Vec<Handler>>,
    next_id: AtomicU64,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            global: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a channel, or update its metadata if already present.
    ///
    /// Subscribers survive re-registration. Returns `true` for a new channel.
    pub fn register(&self, channel: Channel) -> bool {
        let mut channels = self.channels.write();
        match channels.get_mut(&channel.id) {
            Some(entry) => {
                debug!(channel = %channel.id, "Channel metadata updated");
                entry.channel = channel;
                false
            }
            None => {
                info!(channel = %channel.id, label = %channel.label, "Channel registered");
                channels.insert(
                    channel.id.clone(),
                    ChannelEntry {
                        channel,
                        subscribers: Vec::new(),
                    },
                );
                true
            }
        }
    }

    #[must_use]
    pub fn contains(&self, id: &ChannelId) -> bool {
        self.channels.read().contains_key(id)
    }

    #[must_use]
    pub fn get(&self, id: &ChannelId) -> Option<Channel> {
        self.channels.read().get(id).map(|e| e.channel.clone())
    }

    /// All channels, sorted by id.
    #[must_use]
    pub fn list(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self
            .channels
            .read()
            .values()
            .map(|e| e.channel.clone())
            .collect();
        channels.sort_by(|a, b| a.id.cmp(&b.id));
        channels
    }

    /// Append a handler to a channel.
    ///
    /// # Errors
    ///
    /// `BusError::UnknownChannel` if the channel is not registered.
    pub fn add_subscriber(
        &self,
        channel: &ChannelId,
        handler: Arc<dyn Subscriber>,
    ) -> Result<u64, BusError> {
        let mut channels = self.channels.write();
        let entry = channels
            .get_mut(channel)
            .ok_or_else(|| BusError::UnknownChannel(channel.clone()))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(channel = %channel, subscriber = handler.name(), id, "Subscriber added");
        entry.subscribers.push((id, handler));
        Ok(id)
    }

    /// Append a handler that receives every channel.
    pub fn add_global(&self, handler: Arc<dyn Subscriber>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(subscriber = handler.name(), id, "Global subscriber added");
        self.global.write().push((id, handler));
        id
    }

    /// Remove a handler. Returns `false` if it was not present.
    pub fn remove_subscriber(&self, target: &SubscriptionTarget, id: u64) -> bool {
        match target {
            SubscriptionTarget::All => {
                let mut global = self.global.write();
                let before = global.len();
                global.retain(|(sid, _)| *sid != id);
                global.len() != before
            }
            SubscriptionTarget::Channel(channel) => {
                let mut channels = self.channels.write();
                let Some(entry) = channels.get_mut(channel) else {
                    return false;
                };
                let before = entry.subscribers.len();
                entry.subscribers.retain(|(sid, _)| *sid != id);
                entry.subscribers.len() != before
            }
        }
    }

    /// Handlers to invoke for an envelope on `channel`: global handlers
    /// first, then channel handlers, each in registration order.
    #[must_use]
    pub fn dispatch_targets(&self, channel: &ChannelId) -> Vec<Arc<dyn Subscriber>> {
        let mut targets: Vec<Arc<dyn Subscriber>> =
            self.global.read().iter().map(|(_, h)| h.clone()).collect();
        targets.extend(self.channel_subscribers(channel));
        targets
    }

    /// Channel handlers only, in registration order.
    #[must_use]
    pub fn channel_subscribers(&self, channel: &ChannelId) -> Vec<Arc<dyn Subscriber>> {
        self.channels
            .read()
            .get(channel)
            .map(|e| e.subscribers.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }

    /// Subscriber count for a channel, or the global count for `None`.
    #[must_use]
    pub fn subscriber_count(&self, channel: Option<&ChannelId>) -> usize {
        match channel {
            Some(id) => self
                .channels
                .read()
                .get(id)
                .map_or(0, |e| e.subscribers.len()),
            None => self.global.read().len(),
        }
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
