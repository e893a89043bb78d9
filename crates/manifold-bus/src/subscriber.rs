//! # Subscribers
//!
//! Defines the receiving side of the bus: the [`Subscriber`] trait, the
//! [`Subscription`] handle returned by `subscribe`, and [`EventStream`] for
//! consumers that prefer pulling envelopes over callbacks.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use async_trait::async_trait;
use manifold_types::{ChannelId, Envelope};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::debug;

use crate::registry::ChannelRegistry;

/// A handler invoked for each envelope delivered to the channel it is
/// subscribed to.
///
/// Errors and panics are caught and logged by the bus; they never affect
/// sibling subscribers or wormhole forwarding.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "subscriber"
    }

    /// Handle one envelope.
    async fn handle(&self, envelope: Arc<Envelope>) -> anyhow::Result<()>;
}

/// Closure-backed subscriber, see [`from_fn`].
pub struct FnSubscriber<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> Subscriber for FnSubscriber<F>
where
    F: Fn(Arc<Envelope>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, envelope: Arc<Envelope>) -> anyhow::Result<()> {
        (self.f)(envelope).await
    }
}

/// Wrap an async closure as a subscriber.
pub fn from_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn Subscriber>
where
    F: Fn(Arc<Envelope>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnSubscriber {
        name: name.into(),
        f,
    })
}

/// What a subscription is attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionTarget {
    Channel(ChannelId),
    /// Every channel.
    All,
}

/// Handle returned by `subscribe`.
///
/// Dropping the handle unsubscribes; call [`Subscription::detach`] to keep
/// the handler for the lifetime of the bus.
#[must_use = "dropping a Subscription unsubscribes"]
pub struct Subscription {
    id: u64,
    target: SubscriptionTarget,
    registry: Weak<ChannelRegistry>,
    active: AtomicBool,
    detached: bool,
}

impl Subscription {
    pub(crate) fn new(id: u64, target: SubscriptionTarget, registry: Weak<ChannelRegistry>) -> Self {
        Self {
            id,
            target,
            registry,
            active: AtomicBool::new(true),
            detached: false,
        }
    }

    /// Remove the handler. Returns `false` if it was already removed.
    pub fn unsubscribe(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let removed = registry.remove_subscriber(&self.target, self.id);
        debug!(target = ?self.target, id = self.id, "Subscription removed");
        removed
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn target(&self) -> &SubscriptionTarget {
        &self.target
    }

    /// Keep the handler registered after this handle is dropped.
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if !self.detached {
            self.unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Subscriber that pushes envelopes into a bounded channel for an
/// [`EventStream`]. Envelopes are dropped when the consumer lags.
pub(crate) struct StreamForwarder {
    pub(crate) sender: tokio::sync::mpsc::Sender<Arc<Envelope>>,
}

#[async_trait]
impl Subscriber for StreamForwarder {
    fn name(&self) -> &str {
        "event-stream"
    }

    async fn handle(&self, envelope: Arc<Envelope>) -> anyhow::Result<()> {
        if let Err(e) = self.sender.try_send(envelope) {
            debug!(error = %e, "Event stream lagging, envelope dropped");
        }
        Ok(())
    }
}

/// Pull-based view of a channel.
///
/// Implements `tokio_stream::Stream`. The underlying subscription is
/// removed when the stream is dropped.
pub struct EventStream {
    subscription: Subscription,
    inner: ReceiverStream<Arc<Envelope>>,
}

impl EventStream {
    pub(crate) fn new(
        subscription: Subscription,
        receiver: tokio::sync::mpsc::Receiver<Arc<Envelope>>,
    ) -> Self {
        Self {
            subscription,
            inner: ReceiverStream::new(receiver),
        }
    }

    #[must_use]
    pub fn target(&self) -> &SubscriptionTarget {
        self.subscription.target()
    }
}

impl Stream for EventStream {
    type Item = Arc<Envelope>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
